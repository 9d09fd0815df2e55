//! Configuration loading for chat-client.
//!
//! Configuration is loaded from a TOML file (conventionally `hearsay.toml`).
//! Every section and field is optional.

use chat_core::DEFAULT_CHUNK_SIZE;
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for a chat session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Relay configuration.
    #[serde(default)]
    pub relays: RelaysConfig,
    /// Intake queue configuration.
    #[serde(default)]
    pub intake: IntakeConfig,
    /// Attachment configuration.
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaysConfig {
    /// Relay URLs handed to the transport.
    #[serde(default = "default_relay_urls")]
    pub urls: Vec<String>,
}

/// Intake queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    /// Bound of the merged intake queue (default: 1024).
    #[serde(default = "default_intake_capacity")]
    pub capacity: usize,
}

/// Attachment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentsConfig {
    /// Raw bytes per outbound image chunk (default: 32 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter; `RUST_LOG` takes precedence (default: "info").
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_relay_urls() -> Vec<String> {
    Vec::new()
}

fn default_intake_capacity() -> usize {
    1024
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for RelaysConfig {
    fn default() -> Self {
        Self {
            urls: default_relay_urls(),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            capacity: default_intake_capacity(),
        }
    }
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
