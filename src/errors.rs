//! Error handling for the poll system

use crate::types::{OptionId, PollId, UserId};

/// Result type alias for the poll system
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the poll system
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Poll is inactive or past its expiry
    #[error("Poll {poll_id} is closed for voting")]
    PollClosed { poll_id: PollId },

    /// Option does not belong to the poll being voted on
    #[error("Option {option_id} does not belong to poll {poll_id}")]
    InvalidOption { poll_id: PollId, option_id: OptionId },

    /// Unique (poll, user) constraint violated
    #[error("User {user_id} has already voted in poll {poll_id}")]
    DuplicateVote { poll_id: PollId, user_id: UserId },

    /// Referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Missing, unknown, revoked or expired credentials
    #[error("Authentication failed: {reason}")]
    Unauthorized { reason: String },

    /// Authenticated but not allowed
    #[error("Permission denied: {reason}")]
    Forbidden { reason: String },

    /// Validation errors
    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// Too many requests from one client
    #[error("Rate limit exceeded, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    /// Storage engine errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Cache store errors (recovered by the read path)
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a not-found error for the given entity
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a new unauthorized error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create a new forbidden error
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller caused this error (as opposed to an infrastructure fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Storage { .. } | Self::Cache { .. } | Self::Serialization(_) | Self::Internal { .. }
        )
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::Error::storage($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::storage(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! cache_error {
    ($msg:expr) => {
        $crate::Error::cache($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::cache(format!($fmt, $($arg)*))
    };
}
