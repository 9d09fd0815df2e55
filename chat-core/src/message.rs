//! Materialized chat messages and their display order.

use chat_types::{PublicKey, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageKind {
    /// Plain text
    Text,
    /// Base64-encoded image
    Image,
}

/// A decrypted message, derived from one record (or one attachment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Record this message was materialized from. For attachments, the
    /// first chunk.
    pub record: Record,
    /// Sender.
    pub author: PublicKey,
    /// Text or image.
    pub kind: ChatMessageKind,
    /// Sender's wall clock (seconds).
    pub created_at: u64,
    /// Sender's logical clock, when stamped.
    pub lamport: Option<u64>,
    /// Decrypted text, or reconstructed base64 payload.
    pub content: String,
}

impl ChatMessage {
    /// Build a message from a record and its decrypted content.
    pub fn new(record: Record, kind: ChatMessageKind, content: String) -> Self {
        Self {
            author: record.author,
            created_at: record.created_at,
            lamport: record.lamport(),
            record,
            kind,
            content,
        }
    }

    /// Id of the underlying record.
    pub fn id(&self) -> RecordId {
        self.record.id
    }
}

/// Display order of two messages.
///
/// Lamport stamps decide when both messages carry one and they differ;
/// otherwise wall-clock `created_at` decides, then record id.
pub fn compare(a: &ChatMessage, b: &ChatMessage) -> Ordering {
    match (a.lamport, b.lamport) {
        (Some(x), Some(y)) if x != y => x.cmp(&y),
        _ => a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.record.id.cmp(&b.record.id)),
    }
}

/// Stable sort by [`compare`].
///
/// `compare` is not transitive across a mix of stamped and unstamped
/// messages, which the standard library sorts may reject with a panic.
/// This merge sort accepts any comparator.
pub fn sort_chronologically(messages: &mut Vec<ChatMessage>) {
    if messages.len() < 2 {
        return;
    }
    let items = std::mem::take(messages);
    *messages = merge_sort(items);
}

fn merge_sort(mut items: Vec<ChatMessage>) -> Vec<ChatMessage> {
    if items.len() < 2 {
        return items;
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items);
    let right = merge_sort(right);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(r, l) != Ordering::Less,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    merged
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chat_types::{Kind, Tags, UnsignedRecord};

    pub(crate) fn message(created_at: u64, lamport: Option<u64>, text: &str) -> ChatMessage {
        let tags = match lamport {
            Some(v) => Tags::new().with_lamport(v),
            None => Tags::new(),
        };
        let record = Record::from_unsigned(
            UnsignedRecord::new(PublicKey::from_bytes([1; 32]), Kind::DirectMessage, tags, text)
                .with_created_at(created_at),
            String::new(),
        );
        ChatMessage::new(record, ChatMessageKind::Text, text.to_string())
    }

    fn contents(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn lamport_beats_wall_clock() {
        let a = message(10, Some(1), "a");
        let b = message(5, Some(2), "b");
        assert_eq!(compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn equal_lamport_falls_back_to_wall_clock() {
        let a = message(10, Some(3), "a");
        let b = message(5, Some(3), "b");
        assert_eq!(compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn missing_lamport_falls_back_to_wall_clock() {
        let a = message(10, Some(1), "a");
        let b = message(5, None, "b");
        assert_eq!(compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn sort_orders_history() {
        let mut messages = vec![
            message(300, Some(3), "third"),
            message(100, Some(1), "first"),
            message(200, Some(2), "second"),
            message(50, None, "legacy"),
        ];
        sort_chronologically(&mut messages);
        assert_eq!(contents(&messages), vec!["legacy", "first", "second", "third"]);
    }

    #[test]
    fn sort_survives_intransitive_input() {
        // a < c by lamport, c < b by time, b < a by time.
        let mut messages = vec![
            message(5, Some(1), "a"),
            message(3, None, "b"),
            message(1, Some(2), "c"),
        ];
        sort_chronologically(&mut messages);
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChatMessageKind::Image).unwrap(),
            "\"image\""
        );
    }
}
