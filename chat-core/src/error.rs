//! Error types for conversation processing.

use chat_crypto::CryptoError;
use chat_types::{PublicKey, TypeError};
use thiserror::Error;

/// Errors raised while folding records into conversation state.
///
/// When folding, every variant is a per-record failure: the caller drops
/// the offending record and keeps going. [`CoreError::NotAdmin`] and
/// [`CoreError::UnknownGroup`] are also returned by outbound preparation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Content could not be decrypted with the key its role implies.
    #[error("decryption failed: {0}")]
    Decryption(#[source] CryptoError),

    /// Outbound encryption or signing failed.
    #[error("crypto error: {0}")]
    Crypto(#[source] CryptoError),

    /// Decrypted payload did not match the expected schema.
    #[error("schema error: {0}")]
    Schema(String),

    /// Group record refers to a group with no known cipher key.
    #[error("unknown group: {0}")]
    UnknownGroup(PublicKey),

    /// Only the creator of a group may invite.
    #[error("not admin of group {0}")]
    NotAdmin(PublicKey),

    /// One or more attachment chunks are missing.
    #[error("incomplete attachment {id}: missing chunks {missing:?}")]
    IncompleteAttachment {
        /// Attachment identifier.
        id: String,
        /// Indexes that have not arrived.
        missing: Vec<u32>,
    },

    /// Attachment chunks are present but do not decode.
    #[error("corrupt attachment {id}: {reason}")]
    CorruptAttachment {
        /// Attachment identifier.
        id: String,
        /// What went wrong.
        reason: String,
    },

    /// Record kind is not handled by this component.
    #[error("unexpected record kind {0:?}")]
    UnexpectedKind(chat_types::Kind),

    /// Record tags are malformed.
    #[error("invalid tags: {0}")]
    InvalidTags(#[from] TypeError),
}

impl CoreError {
    /// Wrap a decryption failure.
    pub fn decryption(err: CryptoError) -> Self {
        CoreError::Decryption(err)
    }

    /// Build a schema error from any displayable cause.
    pub fn schema(reason: impl std::fmt::Display) -> Self {
        CoreError::Schema(reason.to_string())
    }
}
