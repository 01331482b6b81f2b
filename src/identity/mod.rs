//! Accounts, password handling and access tokens

pub mod password;
pub mod session;
pub mod users;

pub use password::{Argon2Hasher, MIN_PASSWORD_LENGTH, validate_password};
pub use session::{
    AccessToken, Session, SessionCleanupService, SessionCleanupStats, SessionService, SessionState,
    SessionStats,
};
pub use users::{ProfileUpdate, Registration, UserDirectory};
