//! Configuration management for the poll system
//!
//! Loads settings from environment variables (and a `.env` file when present)
//! with validation and sensible defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Upper bound on the access token lifetime (ten years)
pub const MAX_ACCESS_TOKEN_LIFETIME_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Security configuration for sessions and password hashing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Key for digesting access tokens at rest (base64 encoded, minimum 32 bytes)
    pub token_secret: String,

    /// Access token lifetime in seconds (default: 1 hour)
    pub access_token_lifetime_seconds: u64,

    /// How often the session cleanup task runs (default: 5 minutes)
    pub session_cleanup_interval_seconds: u64,

    /// Argon2 memory cost in KiB
    pub password_memory_kib: u32,

    /// Argon2 iteration count
    pub password_iterations: u32,
}

impl SecurityConfig {
    /// Load security configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let token_secret = std::env::var("POLL_TOKEN_SECRET")
            .map_err(|_| Error::internal("POLL_TOKEN_SECRET environment variable required"))?;

        Self::validate_secret(&token_secret, "POLL_TOKEN_SECRET")?;

        let access_token_lifetime_seconds = env_or("POLL_ACCESS_TOKEN_LIFETIME_SECONDS", 3600)?;
        Self::validate_lifetime(access_token_lifetime_seconds, "POLL_ACCESS_TOKEN_LIFETIME_SECONDS")?;

        Ok(Self {
            token_secret,
            access_token_lifetime_seconds,
            session_cleanup_interval_seconds: env_or("POLL_SESSION_CLEANUP_INTERVAL_SECONDS", 300)?,
            password_memory_kib: env_or("POLL_PASSWORD_MEMORY_KIB", 19_456)?,
            password_iterations: env_or("POLL_PASSWORD_ITERATIONS", 2)?,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        use base64::Engine;
        let token_secret =
            base64::engine::general_purpose::STANDARD.encode(rand::random::<[u8; 32]>());

        Self {
            token_secret,
            access_token_lifetime_seconds: 300,
            session_cleanup_interval_seconds: 30,
            // Cheap hashing keeps test registration fast
            password_memory_kib: 64,
            password_iterations: 1,
        }
    }

    /// Validate a base64-encoded secret
    fn validate_secret(secret: &str, name: &str) -> Result<()> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(secret)
            .map_err(|_| Error::internal(format!("{name} must be valid base64")))?;

        if decoded.len() < 32 {
            return Err(Error::internal(format!(
                "{name} must be at least 32 bytes when decoded"
            )));
        }

        Ok(())
    }

    /// Token lifetimes must be positive and at most ten years
    fn validate_lifetime(seconds: u64, name: &str) -> Result<()> {
        if seconds == 0 || seconds > MAX_ACCESS_TOKEN_LIFETIME_SECONDS {
            return Err(Error::internal(format!(
                "{name} must be between 1 and {MAX_ACCESS_TOKEN_LIFETIME_SECONDS}"
            )));
        }
        Ok(())
    }

    /// Check a configuration that was built by hand rather than loaded
    pub fn validate(&self) -> Result<()> {
        Self::validate_secret(&self.token_secret, "token_secret")?;
        Self::validate_lifetime(
            self.access_token_lifetime_seconds,
            "access_token_lifetime_seconds",
        )
    }

    /// First 32 bytes of the decoded token secret, used as a BLAKE3 key
    pub fn token_key(&self) -> Result<[u8; 32]> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&self.token_secret)
            .map_err(|_| Error::internal("Invalid token secret"))?;

        decoded
            .get(..32)
            .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
            .ok_or_else(|| Error::internal("Token secret must be at least 32 bytes"))
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// When false every read goes straight to storage
    pub enabled: bool,
    /// TTL of cached poll results
    pub result_ttl_seconds: u64,
    /// TTL of cached listings and poll details
    pub listing_ttl_seconds: u64,
    /// Upper bound on entries held by the in-memory cache
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            result_ttl_seconds: 60,
            listing_ttl_seconds: 30,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: env_or("POLL_CACHE_ENABLED", defaults.enabled)?,
            result_ttl_seconds: env_or("POLL_CACHE_RESULT_TTL_SECONDS", defaults.result_ttl_seconds)?,
            listing_ttl_seconds: env_or("POLL_CACHE_LISTING_TTL_SECONDS", defaults.listing_ttl_seconds)?,
            max_entries: env_or("POLL_CACHE_MAX_ENTRIES", defaults.max_entries)?,
        })
    }
}

/// Request rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Registrations allowed per client within one window
    pub registrations_per_window: u32,
    pub registration_window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            registrations_per_window: 5,
            registration_window_seconds: 3600,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            registrations_per_window: env_or(
                "POLL_REGISTRATION_LIMIT",
                defaults.registrations_per_window,
            )?,
            registration_window_seconds: env_or(
                "POLL_REGISTRATION_WINDOW_SECONDS",
                defaults.registration_window_seconds,
            )?,
        })
    }
}

/// Poll listing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub page_size: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { page_size: 10 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub security: SecurityConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub polls: PollConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        let security = SecurityConfig::from_env()?;
        let cache = CacheConfig::from_env()?;
        let rate_limit = RateLimitConfig::from_env()?;

        let page_size = env_or("POLL_PAGE_SIZE", PollConfig::default().page_size)?;
        if page_size == 0 {
            return Err(Error::internal("POLL_PAGE_SIZE must be greater than zero"));
        }

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
        };

        Ok(Self {
            security,
            cache,
            rate_limit,
            polls: PollConfig { page_size },
            logging,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        };

        Self {
            security: SecurityConfig::for_testing(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            polls: PollConfig::default(),
            logging,
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when unset
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::internal(format!("Invalid {name}"))),
        Err(_) => Ok(default),
    }
}
