//! Pairwise symmetric encryption.
//!
//! A pairwise key is derived from an X25519 shared secret with HKDF-SHA256,
//! so both sides of a conversation derive the same key. Ciphertext is
//! carried in record content as `base64(nonce || ciphertext)`.

use crate::CryptoError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Derive the conversation key from a raw X25519 shared secret.
pub(crate) fn derive_pairwise_key(
    shared_secret: &[u8; 32],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(b"hearsay-pairwise-v1"), shared_secret);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(b"encryption", &mut key[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

/// Encrypt and encode as `base64(nonce || ciphertext)`.
pub(crate) fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<String, CryptoError> {
    // Generate random 192-bit nonce
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce_bytes).expect("getrandom failed");
    let nonce = XNonce::from_slice(&nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

/// Decode `base64(nonce || ciphertext)` and decrypt.
pub(crate) fn open(key: &[u8; KEY_SIZE], encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
    if bytes.len() < NONCE_SIZE {
        return Err(CryptoError::MalformedCiphertext(format!(
            "{} bytes is shorter than the nonce",
            bytes.len()
        )));
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
