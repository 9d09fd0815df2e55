//! Error types for chat-client.

use crate::config::ConfigError;
use crate::intake::IntakeError;
use crate::store::StoreError;
use crate::transport::TransportError;
use chat_core::CoreError;
use chat_crypto::CryptoError;

/// Main error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A record could not be folded into conversation state.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Intake error.
    #[error("intake error: {0}")]
    Intake(#[from] IntakeError),

    /// A record failed id or signature verification.
    #[error("invalid record: {0}")]
    InvalidRecord(#[source] CryptoError),

    /// The session cannot continue (e.g. a subscription failed to open).
    #[error("unexpected state: {0}")]
    UnexpectedState(String),

    /// The tracing subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl ClientError {
    /// True when the session must stop. Anything else concerns a single
    /// record or call and processing can continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::UnexpectedState(_) | ClientError::Intake(IntakeError::QueueClosed { .. })
        )
    }
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, ClientError>;
