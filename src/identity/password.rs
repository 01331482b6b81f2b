//! Password hashing and password policy
//!
//! Hashes are Argon2id PHC strings. The policy mirrors the usual account
//! rules: minimum length, not purely numeric, not a well-known password and
//! not built from the account's own username or email.

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version};
use rand::RngCore;

use crate::config::SecurityConfig;
use crate::{Error, Result};

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Passwords rejected regardless of length
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "passw0rd",
    "12345678",
    "123456789",
    "1234567890",
    "11111111",
    "qwerty123",
    "qwertyuiop",
    "iloveyou",
    "abc12345",
    "letmein1",
    "welcome1",
    "admin123",
    "football",
    "baseball",
    "sunshine",
    "princess",
    "trustno1",
    "superman",
    "starwars",
];

/// Argon2id password hasher
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    /// Create a hasher with explicit cost parameters
    pub fn new(memory_kib: u32, iterations: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| Error::internal(format!("Invalid password hashing parameters: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Create a hasher from the security configuration
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        Self::new(config.password_memory_kib, config.password_iterations)
    }

    /// Hash a password with a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);

        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| Error::internal(format!("Salt encoding failed: {e}")))?;

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::internal(format!("Password hashing failed: {e}")))
    }

    /// Verify a password against a stored PHC string
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| Error::internal(format!("Stored password hash is malformed: {e}")))?;

        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

/// Check a candidate password against the account policy
pub fn validate_password(password: &str, username: &str, email: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::validation(
            "password",
            format!(
                "This password is too short. It must contain at least {MIN_PASSWORD_LENGTH} characters."
            ),
        ));
    }

    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::validation("password", "This password is entirely numeric."));
    }

    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        return Err(Error::validation("password", "This password is too common."));
    }

    let email_local = email.split('@').next().unwrap_or_default();
    for attribute in [username, email_local] {
        let attribute = attribute.to_lowercase();
        if attribute.len() >= 3 && lowered.contains(&attribute) {
            return Err(Error::validation(
                "password",
                "The password is too similar to the username or email.",
            ));
        }
    }

    Ok(())
}
