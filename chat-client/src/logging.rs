//! Tracing setup.

use crate::config::LoggingConfig;
use crate::error::ClientError;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the filter: `RUST_LOG` when set and valid, else the configured one.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ClientError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| ClientError::Logging(format!("invalid filter {:?}: {}", config.filter, e)))
}

/// Install a global fmt subscriber.
///
/// Fails if the filter is invalid or a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ClientError> {
    let filter = env_filter(config)?;
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| ClientError::Logging(e.to_string()))
}
