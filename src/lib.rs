//! Online poll system core
//!
//! Admin-authored polls, a vote ledger that relies on a storage-level
//! `(poll, user)` unique index to reject duplicate votes, and result
//! aggregation read through a cache that every write invalidates.
//!
//! ```no_run
//! use polls::config::Config;
//! use polls::identity::Registration;
//! use polls::system::PollSystem;
//! use polls::types::NewPoll;
//!
//! # fn main() -> polls::Result<()> {
//! let system = PollSystem::in_memory(&Config::for_testing())?;
//! system.register_admin(Registration::new("root", "root@example.com", "Sup3r-Secret-Key", "Site", "Admin"))?;
//! let admin = system.login("root", "Sup3r-Secret-Key")?;
//!
//! let poll = system.create_poll(&admin.token, NewPoll::new("Lunch?", ["Pizza", "Sushi"]))?;
//! system.cast_vote(&admin.token, poll.id, poll.options[0].id)?;
//!
//! let results = system.poll_results(poll.id)?;
//! assert_eq!(results.total_votes, 1);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod errors;
pub mod identity;
pub mod polls;
pub mod rate_limit;
pub mod storage;
pub mod system;
pub mod types;

// Re-export commonly used types
pub use errors::{Error, Result};
pub use system::PollSystem;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default filter (`polls=info`, overridable via `RUST_LOG`)
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "polls=info".into()),
        )
        .try_init()
        .map_err(|e| Error::internal(format!("Failed to install log subscriber: {e}")))?;

    tracing::info!("Poll system v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from configuration
///
/// `RUST_LOG` still wins over `level` when set. `format` is `pretty`,
/// `compact` or anything else for the full single-line format.
pub fn init_with(logging: &config::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("polls={}", logging.level).into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match logging.format.as_str() {
        "pretty" => builder.pretty().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| Error::internal(format!("Failed to install log subscriber: {e}")))?;

    tracing::info!(format = %logging.format, "Poll system v{} initialized", VERSION);
    Ok(())
}
