//! # chat-core
//!
//! Pure conversation logic for hearsay (no I/O, instant tests).
//!
//! This crate turns a stream of signed, encrypted records into
//! conversation state without touching the network or disk:
//!
//! - [`LamportClock`] - causal ordering across senders
//! - [`ConversationList`] - strangers, contacts and groups
//! - [`DirectMessageController`] - decrypted 1:1 history
//! - [`GroupEngine`] - group creation, invitation and messaging
//! - [`attachment`] - chunked image split and reassembly
//!
//! ## Design Philosophy
//!
//! Records arrive out of order and more than once. Every component here
//! is idempotent per record id, or replaces state only with strictly newer
//! records, so replaying history is always safe.
//!
//! The actual I/O (relay subscriptions, storage) is performed by
//! `chat-client`, which feeds records into these components.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attachment;
pub mod clock;
pub mod conversation;
pub mod direct;
pub mod error;
pub mod group;
pub mod message;

pub use attachment::{Attachment, AttachmentChunk, ChunkPart, DEFAULT_CHUNK_SIZE};
pub use clock::LamportClock;
pub use conversation::{ConversationList, ConversationSummary, ConversationType};
pub use direct::{invitation_notice, is_dm_between, DirectMessageController, DirectUpdate};
pub use error::CoreError;
pub use group::{
    classify_group_record, decode_invitation, GroupContent, GroupCreation, GroupEngine,
    GroupInvitation, GroupKeyring, GroupRecordBatches, GroupRecordType, GroupUpdate, NoopWatcher,
    Watcher,
};
pub use message::{compare, sort_chronologically, ChatMessage, ChatMessageKind};
