//! Identity keys and the account abstraction.

use crate::cipher::{derive_pairwise_key, open, seal, KEY_SIZE};
use crate::CryptoError;
use chat_types::{PublicKey, Record, UnsignedRecord};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

/// Operations the rest of the system needs from the local user's key.
///
/// Implemented by [`Keypair`]; a remote signer or hardware key would
/// implement it as well.
pub trait Account: Send + Sync {
    /// Identity of this account.
    fn public_key(&self) -> PublicKey;

    /// Encrypt `plaintext` for the pairwise channel with `counterparty`.
    fn encrypt(&self, counterparty: &PublicKey, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt content from the pairwise channel with `counterparty`.
    fn decrypt(&self, counterparty: &PublicKey, ciphertext: &str) -> Result<String, CryptoError>;

    /// Sign a record authored by this account.
    fn sign(&self, unsigned: UnsignedRecord) -> Result<Record, CryptoError>;
}

/// An Ed25519 key pair.
///
/// The same key signs records and, converted to X25519, agrees pairwise
/// encryption keys. Group admin keys and group cipher keys are keypairs too.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
    public: PublicKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        getrandom::getrandom(&mut seed[..]).expect("getrandom failed");
        Self::from_secret_bytes(&seed)
    }

    /// Build a keypair from its 32-byte secret seed.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(secret);
        let public = PublicKey::from_bytes(signing.verifying_key().to_bytes());
        Self { signing, public }
    }

    /// Parse a keypair from the hex encoding of its secret seed.
    pub fn from_secret_hex(secret: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(hex::decode(secret).map_err(|_| CryptoError::InvalidSecretKey)?);
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes);
        Ok(Self::from_secret_bytes(&seed))
    }

    /// Hex encoding of the secret seed, for inclusion in encrypted payloads.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing.to_bytes()))
    }

    /// Public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    fn pairwise_key(
        &self,
        counterparty: &PublicKey,
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        let verifying = VerifyingKey::from_bytes(counterparty.as_bytes())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let scalar = Zeroizing::new(self.signing.to_scalar_bytes());
        let secret = StaticSecret::from(*scalar);
        let theirs = x25519_dalek::PublicKey::from(verifying.to_montgomery().to_bytes());
        let shared = secret.diffie_hellman(&theirs);
        derive_pairwise_key(shared.as_bytes())
    }
}

impl Account for Keypair {
    fn public_key(&self) -> PublicKey {
        self.public
    }

    fn encrypt(&self, counterparty: &PublicKey, plaintext: &str) -> Result<String, CryptoError> {
        let key = self.pairwise_key(counterparty)?;
        seal(&key, plaintext.as_bytes())
    }

    fn decrypt(&self, counterparty: &PublicKey, ciphertext: &str) -> Result<String, CryptoError> {
        let key = self.pairwise_key(counterparty)?;
        let plaintext = open(&key, ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::MalformedCiphertext("plaintext is not utf-8".into()))
    }

    fn sign(&self, unsigned: UnsignedRecord) -> Result<Record, CryptoError> {
        if unsigned.author != self.public {
            return Err(CryptoError::InvalidSignature);
        }
        let id = unsigned.id();
        let signature = self.signing.sign(id.as_bytes());
        Ok(Record::from_unsigned(
            unsigned,
            hex::encode(signature.to_bytes()),
        ))
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair {{ public: {:?}, secret: [REDACTED] }}", self.public)
    }
}

/// Verify a record's id and author signature.
pub fn verify_record(record: &Record) -> Result<(), CryptoError> {
    if !record.has_valid_id() {
        return Err(CryptoError::IdMismatch);
    }
    let verifying = VerifyingKey::from_bytes(record.author.as_bytes())
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let bytes = hex::decode(&record.sig).map_err(|_| CryptoError::InvalidSignature)?;
    let signature = Signature::from_slice(&bytes).map_err(|_| CryptoError::InvalidSignature)?;
    verifying
        .verify(record.id.as_bytes(), &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}
