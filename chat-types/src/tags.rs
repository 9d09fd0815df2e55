//! Record tags.
//!
//! Tags are an ordered list of string lists; the first element of each
//! inner list names the tag. Three names carry protocol meaning:
//!
//! - `["p", <hex public key>]` - addressed counterparty or group address
//! - `["lamport", <decimal>]` - logical clock stamp of the sender
//! - `["image", <attachment id>, <total>, <index>]` - attachment chunk marker

use crate::{PublicKey, TypeError};
use serde::{Deserialize, Serialize};

/// A single tag.
pub type Tag = Vec<String>;

const P: &str = "p";
const LAMPORT: &str = "lamport";
const IMAGE: &str = "image";

/// Largest chunk count an `image` tag may declare.
pub const MAX_ATTACHMENT_CHUNKS: u32 = 4096;

/// Ordered list of tags attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(Vec<Tag>);

impl Tags {
    /// Empty tag list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `p` tag.
    pub fn with_p(mut self, key: &PublicKey) -> Self {
        self.0.push(vec![P.to_string(), key.to_hex()]);
        self
    }

    /// Append a `lamport` tag.
    pub fn with_lamport(mut self, value: u64) -> Self {
        self.0.push(vec![LAMPORT.to_string(), value.to_string()]);
        self
    }

    /// Append an `image` tag.
    pub fn with_attachment(mut self, tag: &AttachmentTag) -> Self {
        self.0.push(tag.to_tag());
        self
    }

    /// Append an arbitrary tag.
    pub fn push(&mut self, tag: Tag) {
        self.0.push(tag);
    }

    /// True when the record carries no tags at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over raw tags.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    fn values(&self, name: &'static str) -> impl Iterator<Item = &Tag> {
        self.0
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
    }

    /// All well-formed `p` tag values, in order. Malformed entries are skipped.
    pub fn p(&self) -> Vec<PublicKey> {
        self.values(P)
            .filter_map(|t| t.get(1))
            .filter_map(|v| PublicKey::from_hex(v).ok())
            .collect()
    }

    /// The first `p` tag value, if any.
    pub fn first_p(&self) -> Option<PublicKey> {
        self.p().into_iter().next()
    }

    /// The `lamport` stamp, if present and numeric.
    pub fn lamport(&self) -> Option<u64> {
        self.values(LAMPORT)
            .filter_map(|t| t.get(1))
            .find_map(|v| v.parse().ok())
    }

    /// The attachment chunk marker.
    ///
    /// `Ok(None)` when the record is not a chunk; an error when an `image`
    /// tag is present but does not parse.
    pub fn attachment(&self) -> Result<Option<AttachmentTag>, TypeError> {
        match self.values(IMAGE).next() {
            None => Ok(None),
            Some(tag) => AttachmentTag::from_tag(tag).map(Some),
        }
    }
}

impl From<Vec<Tag>> for Tags {
    fn from(tags: Vec<Tag>) -> Self {
        Self(tags)
    }
}

/// Marks a record as one chunk of a split attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentTag {
    /// Identifier shared by every chunk of one attachment.
    pub id: String,
    /// Number of chunks in the attachment.
    pub total: u32,
    /// Zero-based position of this chunk.
    pub index: u32,
}

impl AttachmentTag {
    fn to_tag(&self) -> Tag {
        vec![
            IMAGE.to_string(),
            self.id.clone(),
            self.total.to_string(),
            self.index.to_string(),
        ]
    }

    fn from_tag(tag: &Tag) -> Result<Self, TypeError> {
        let malformed = |reason: &str| TypeError::MalformedTag {
            name: IMAGE,
            reason: reason.to_string(),
        };
        if tag.len() < 4 {
            return Err(malformed("expected id, total and index"));
        }
        let total: u32 = tag[2].parse().map_err(|_| malformed("total is not a number"))?;
        let index: u32 = tag[3].parse().map_err(|_| malformed("index is not a number"))?;
        if total == 0 || index >= total {
            return Err(malformed("index out of range"));
        }
        if total > MAX_ATTACHMENT_CHUNKS {
            return Err(malformed("too many chunks"));
        }
        Ok(Self {
            id: tag[1].clone(),
            total,
            index,
        })
    }
}
