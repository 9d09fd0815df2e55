//! # chat-crypto
//!
//! Cryptographic primitives for hearsay.
//!
//! - **Identity keys**: Ed25519; the hex public key is the identity
//! - **Pairwise encryption**: X25519 agreement on the converted identity keys,
//!   HKDF-SHA256, XChaCha20-Poly1305 with 192-bit random nonces
//! - **Record signing**: Ed25519 over the record id
//!
//! Group keys (admin key, cipher key) are ordinary [`Keypair`]s, so the
//! group protocol is built entirely on the pairwise primitive.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cipher;
mod error;
mod keypair;

pub use cipher::{KEY_SIZE, NONCE_SIZE};
pub use error::CryptoError;
pub use keypair::{verify_record, Account, Keypair};
