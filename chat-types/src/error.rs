//! Error types for hearsay wire types.

use thiserror::Error;

/// Errors that can occur while parsing or encoding wire types.
#[derive(Debug, Error)]
pub enum TypeError {
    /// Hex string could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Decoded identifier had the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Record kind discriminator is not one this protocol understands.
    #[error("unsupported record kind: {0}")]
    UnsupportedKind(u32),

    /// A tag did not have the expected shape.
    #[error("malformed {name} tag: {reason}")]
    MalformedTag {
        /// Tag name (first element).
        name: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
