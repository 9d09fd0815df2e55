//! Chunked attachment codec.
//!
//! A binary attachment too large for one record is split into slices, each
//! carried by its own record with an `image` tag naming the attachment id,
//! the chunk count and the chunk index. Chunks may arrive in any order and
//! more than once; reassembly succeeds only when every index is present.
//!
//! Each slice is a multiple of three bytes, so the base64 of every slice
//! concatenates to the base64 of the whole payload.

use crate::CoreError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chat_types::{AttachmentTag, MAX_ATTACHMENT_CHUNKS};
use std::collections::BTreeMap;

/// Default slice size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Missing indexes listed in an [`CoreError::IncompleteAttachment`].
const REPORTED_MISSING: usize = 16;

/// Anything that can carry an attachment chunk.
pub trait ChunkPart {
    /// Chunk marker, `None` for ordinary records.
    fn attachment(&self) -> Option<&AttachmentTag>;

    /// Base64 slice carried by this chunk.
    fn payload(&self) -> &str;
}

/// One outbound chunk produced by [`split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentChunk {
    /// Position and identity of this chunk.
    pub tag: AttachmentTag,
    /// Base64 of the slice.
    pub content: String,
}

impl ChunkPart for AttachmentChunk {
    fn attachment(&self) -> Option<&AttachmentTag> {
        Some(&self.tag)
    }

    fn payload(&self) -> &str {
        &self.content
    }
}

/// A reassembled attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Attachment identifier.
    pub id: String,
    /// Decoded bytes.
    pub data: Vec<u8>,
    /// Base64 of `data`, as carried on the wire.
    pub encoded: String,
}

/// Records partitioned by attachment.
#[derive(Debug)]
pub struct Grouped<T> {
    /// Chunks per attachment id, ordered by index.
    pub attachments: BTreeMap<String, Vec<T>>,
    /// Items that are not chunks.
    pub residual: Vec<T>,
}

/// Partition items by attachment id.
///
/// Chunks of the same attachment are sorted by their declared index;
/// everything without a chunk marker lands in `residual` in arrival order.
pub fn group<T: ChunkPart>(items: impl IntoIterator<Item = T>) -> Grouped<T> {
    let mut attachments: BTreeMap<String, Vec<T>> = BTreeMap::new();
    let mut residual = Vec::new();

    for item in items {
        match item.attachment().map(|t| t.id.clone()) {
            Some(id) => attachments.entry(id).or_default().push(item),
            None => residual.push(item),
        }
    }

    for chunks in attachments.values_mut() {
        chunks.sort_by_key(|c| c.attachment().map(|t| t.index).unwrap_or(0));
    }

    Grouped {
        attachments,
        residual,
    }
}

/// Reassemble one attachment from its chunks, in any order.
///
/// Duplicate indexes are ignored (first wins). All chunks must agree on id
/// and total. An incomplete attachment reports at most the first sixteen
/// missing indexes.
pub fn reassemble<T: ChunkPart>(chunks: &[T]) -> Result<Attachment, CoreError> {
    let first = match chunks.iter().find_map(|c| c.attachment()) {
        Some(tag) => tag,
        None => {
            return Err(CoreError::IncompleteAttachment {
                id: String::new(),
                missing: vec![0],
            })
        }
    };
    let id = first.id.clone();
    let total = first.total;
    if total > MAX_ATTACHMENT_CHUNKS {
        return Err(CoreError::CorruptAttachment {
            id,
            reason: format!("{} chunks declared, limit is {}", total, MAX_ATTACHMENT_CHUNKS),
        });
    }

    let mut slices: BTreeMap<u32, &str> = BTreeMap::new();
    for chunk in chunks {
        let tag = chunk.attachment().ok_or_else(|| CoreError::CorruptAttachment {
            id: id.clone(),
            reason: "untagged record among chunks".into(),
        })?;
        if tag.id != id || tag.total != total {
            return Err(CoreError::CorruptAttachment {
                id: id.clone(),
                reason: format!(
                    "chunk {}/{} of {} does not belong to {}/{}",
                    tag.index, tag.total, tag.id, id, total
                ),
            });
        }
        slices.entry(tag.index).or_insert_with(|| chunk.payload());
    }

    let missing: Vec<u32> = (0..total)
        .filter(|i| !slices.contains_key(i))
        .take(REPORTED_MISSING)
        .collect();
    if !missing.is_empty() {
        return Err(CoreError::IncompleteAttachment { id, missing });
    }

    let encoded: String = slices.values().copied().collect();
    let data = STANDARD
        .decode(&encoded)
        .map_err(|e| CoreError::CorruptAttachment {
            id: id.clone(),
            reason: e.to_string(),
        })?;

    Ok(Attachment { id, data, encoded })
}

/// Split a payload under a fresh random attachment id.
pub fn split(payload: &[u8], chunk_size: usize) -> Vec<AttachmentChunk> {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw).expect("getrandom failed");
    split_with_id(&hex::encode(raw), payload, chunk_size)
}

/// Split a payload under a caller-chosen attachment id.
///
/// `chunk_size` is rounded up to a multiple of three bytes, and grown when
/// the payload would otherwise need more than [`MAX_ATTACHMENT_CHUNKS`]
/// chunks. An empty payload still yields a single (empty) chunk.
pub fn split_with_id(id: &str, payload: &[u8], chunk_size: usize) -> Vec<AttachmentChunk> {
    let floor = payload.len().div_ceil(MAX_ATTACHMENT_CHUNKS as usize);
    let size = chunk_size.max(floor).max(1).div_ceil(3) * 3;
    let slices: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(size).collect()
    };
    let total = slices.len() as u32;

    slices
        .into_iter()
        .enumerate()
        .map(|(index, slice)| AttachmentChunk {
            tag: AttachmentTag {
                id: id.to_string(),
                total,
                index: index as u32,
            },
            content: STANDARD.encode(slice),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Note(&'static str);

    impl ChunkPart for Note {
        fn attachment(&self) -> Option<&AttachmentTag> {
            None
        }

        fn payload(&self) -> &str {
            self.0
        }
    }

    #[derive(Debug)]
    enum Item {
        Chunk(AttachmentChunk),
        Note(Note),
    }

    impl ChunkPart for Item {
        fn attachment(&self) -> Option<&AttachmentTag> {
            match self {
                Item::Chunk(c) => c.attachment(),
                Item::Note(n) => n.attachment(),
            }
        }

        fn payload(&self) -> &str {
            match self {
                Item::Chunk(c) => c.payload(),
                Item::Note(n) => n.payload(),
            }
        }
    }

    fn payload() -> Vec<u8> {
        (0..=255u8).cycle().take(1000).collect()
    }

    #[test]
    fn split_then_reassemble() {
        let chunks = split(&payload(), 100);
        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.tag.total == 10));

        let attachment = reassemble(&chunks).unwrap();
        assert_eq!(attachment.data, payload());
        assert_eq!(attachment.id, chunks[0].tag.id);
    }

    #[test]
    fn reassemble_any_order() {
        let mut chunks = split_with_id("img", &payload(), 64);
        chunks.reverse();
        let mid = chunks.len() / 2;
        chunks.swap(0, mid);

        assert_eq!(reassemble(&chunks).unwrap().data, payload());
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut chunks = split_with_id("img", &payload(), 300);
        chunks.push(chunks[1].clone());
        chunks.push(chunks[0].clone());

        assert_eq!(reassemble(&chunks).unwrap().data, payload());
    }

    #[test]
    fn missing_chunk_is_incomplete() {
        let mut chunks = split_with_id("img", &payload(), 100);
        chunks.remove(3);

        match reassemble(&chunks) {
            Err(CoreError::IncompleteAttachment { id, missing }) => {
                assert_eq!(id, "img");
                assert_eq!(missing, vec![3]);
            }
            other => panic!("expected incomplete attachment, got {:?}", other),
        }
    }

    #[test]
    fn huge_declared_total_is_rejected_without_allocating() {
        let chunk = AttachmentChunk {
            tag: AttachmentTag {
                id: "big".into(),
                total: u32::MAX,
                index: 0,
            },
            content: "AAAA".into(),
        };

        assert!(matches!(
            reassemble(&[chunk]),
            Err(CoreError::CorruptAttachment { id, .. }) if id == "big"
        ));
    }

    #[test]
    fn missing_report_is_bounded() {
        let chunks = split_with_id("img", &[1u8; 3000], 3);
        assert_eq!(chunks.len(), 1000);

        match reassemble(&chunks[..1]) {
            Err(CoreError::IncompleteAttachment { missing, .. }) => {
                assert_eq!(missing, (1..=16).collect::<Vec<u32>>());
            }
            other => panic!("expected incomplete attachment, got {:?}", other),
        }
    }

    #[test]
    fn split_stays_within_chunk_limit() {
        let payload = vec![7u8; MAX_ATTACHMENT_CHUNKS as usize * 3 + 10];
        let chunks = split_with_id("img", &payload, 3);

        assert!(chunks.len() <= MAX_ATTACHMENT_CHUNKS as usize);
        assert_eq!(chunks[0].tag.total as usize, chunks.len());
        assert_eq!(reassemble(&chunks).unwrap().data, payload);
    }

    #[test]
    fn bad_base64_is_corrupt() {
        let mut chunks = split_with_id("img", &payload(), 100);
        chunks[2].content = "@@@@".into();

        assert!(matches!(
            reassemble(&chunks),
            Err(CoreError::CorruptAttachment { .. })
        ));
    }

    #[test]
    fn mixed_attachments_are_corrupt() {
        let mut chunks = split_with_id("a", &payload(), 500);
        chunks.extend(split_with_id("b", &payload(), 500));

        assert!(matches!(
            reassemble(&chunks),
            Err(CoreError::CorruptAttachment { .. })
        ));
    }

    #[test]
    fn chunk_size_rounds_to_whole_base64_groups() {
        let chunks = split_with_id("img", &payload(), 10);
        // 10 rounds up to 12 bytes, which encodes without padding.
        assert!(!chunks[0].content.contains('='));
        assert_eq!(reassemble(&chunks).unwrap().data, payload());
    }

    #[test]
    fn empty_payload_is_one_chunk() {
        let chunks = split_with_id("empty", &[], 100);
        assert_eq!(chunks.len(), 1);
        assert!(reassemble(&chunks).unwrap().data.is_empty());
    }

    #[test]
    fn group_partitions_by_attachment() {
        let mut items: Vec<Item> = Vec::new();
        items.push(Item::Note(Note("hello")));
        for c in split_with_id("b", &payload(), 400).into_iter().rev() {
            items.push(Item::Chunk(c));
        }
        items.push(Item::Note(Note("world")));
        for c in split_with_id("a", &payload(), 600) {
            items.push(Item::Chunk(c));
        }

        let grouped = group(items);

        assert_eq!(grouped.residual.len(), 2);
        assert_eq!(grouped.residual[0].payload(), "hello");
        assert_eq!(grouped.attachments.len(), 2);

        let b = &grouped.attachments["b"];
        let indexes: Vec<u32> = b.iter().filter_map(|c| c.attachment()).map(|t| t.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        assert_eq!(reassemble(b).unwrap().data, payload());
        assert_eq!(reassemble(&grouped.attachments["a"]).unwrap().data, payload());
    }
}
