//! Crypto errors.

use thiserror::Error;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error or wrong key).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Ciphertext was not valid base64 or too short to hold a nonce.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Counterparty key is not a valid curve point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Secret key hex could not be decoded.
    #[error("invalid secret key encoding")]
    InvalidSecretKey,

    /// Signature missing, malformed or not valid for the record.
    #[error("invalid signature")]
    InvalidSignature,

    /// Record id does not match its contents.
    #[error("record id mismatch")]
    IdMismatch,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
}
