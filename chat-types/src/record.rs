//! Signed, append-only records.
//!
//! A record is the unit the relay network stores and forwards. The relay
//! sees authors, kinds and tags; `content` is opaque ciphertext for every
//! private kind.

use crate::{Kind, PublicKey, RecordId, Tags, TypeError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A record that has not been signed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedRecord {
    /// Author identity.
    pub author: PublicKey,
    /// Unix timestamp (seconds), informational only, not trusted.
    pub created_at: u64,
    /// Record kind.
    pub kind: Kind,
    /// Routing and ordering tags.
    pub tags: Tags,
    /// Payload, usually ciphertext.
    pub content: String,
}

impl UnsignedRecord {
    /// Create a new record stamped with the current time.
    pub fn new(author: PublicKey, kind: Kind, tags: Tags, content: impl Into<String>) -> Self {
        Self {
            author,
            created_at: unix_now(),
            kind,
            tags,
            content: content.into(),
        }
    }

    /// Override the creation timestamp.
    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Content address: SHA-256 of `[0, author, created_at, kind, tags, content]`.
    pub fn id(&self) -> RecordId {
        compute_id(
            &self.author,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }
}

fn compute_id(
    author: &PublicKey,
    created_at: u64,
    kind: Kind,
    tags: &Tags,
    content: &str,
) -> RecordId {
    let canonical = (0u8, author.to_hex(), created_at, kind.as_u32(), tags, content);
    // Strings, integers and string lists always serialize.
    let bytes = serde_json::to_vec(&canonical).expect("canonical record serialization");
    let digest = Sha256::digest(&bytes);
    let mut id = [0u8; 32];
    id.copy_from_slice(&digest);
    RecordId::from_bytes(id)
}

/// A signed record as stored by relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Content address.
    pub id: RecordId,
    /// Author identity.
    #[serde(rename = "pubkey")]
    pub author: PublicKey,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    /// Record kind.
    pub kind: Kind,
    /// Routing and ordering tags.
    pub tags: Tags,
    /// Payload.
    pub content: String,
    /// Hex-encoded signature over the id.
    pub sig: String,
}

impl Record {
    /// Attach a signature to an unsigned record.
    pub fn from_unsigned(unsigned: UnsignedRecord, sig: String) -> Self {
        Self {
            id: unsigned.id(),
            author: unsigned.author,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig,
        }
    }

    /// Recompute the content address from the record fields.
    pub fn computed_id(&self) -> RecordId {
        compute_id(
            &self.author,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// True when `id` matches the record fields.
    pub fn has_valid_id(&self) -> bool {
        self.computed_id() == self.id
    }

    /// The logical clock stamp, if the sender attached one.
    pub fn lamport(&self) -> Option<u64> {
        self.tags.lamport()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, TypeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, TypeError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnsignedRecord {
        UnsignedRecord::new(
            PublicKey::from_bytes([3; 32]),
            Kind::DirectMessage,
            Tags::new()
                .with_p(&PublicKey::from_bytes([4; 32]))
                .with_lamport(9),
            "ciphertext",
        )
        .with_created_at(1_700_000_000)
    }

    #[test]
    fn id_is_deterministic() {
        assert_eq!(sample().id(), sample().id());
    }

    #[test]
    fn id_changes_with_content() {
        let mut other = sample();
        other.content.push('!');
        assert_ne!(sample().id(), other.id());
    }

    #[test]
    fn signed_record_carries_id() {
        let record = Record::from_unsigned(sample(), "00".repeat(64));
        assert!(record.has_valid_id());
        assert_eq!(record.lamport(), Some(9));
    }

    #[test]
    fn tampered_record_fails_id_check() {
        let mut record = Record::from_unsigned(sample(), "00".repeat(64));
        record.created_at += 1;
        assert!(!record.has_valid_id());
    }

    #[test]
    fn json_uses_wire_field_names() {
        let record = Record::from_unsigned(sample(), "00".repeat(64));
        let json = record.to_json().unwrap();
        assert!(json.contains("\"pubkey\""));
        assert!(json.contains("\"kind\":4"));

        let back = Record::from_json(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let record = Record::from_unsigned(sample(), "00".repeat(64));
        let json = record.to_json().unwrap().replace("\"kind\":4", "\"kind\":30023");
        assert!(Record::from_json(&json).is_err());
    }
}
