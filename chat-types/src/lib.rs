//! # chat-types
//!
//! Wire format types for the hearsay encrypted chat protocol.
//!
//! This crate provides the foundational types used across all hearsay crates:
//! - [`PublicKey`], [`RecordId`] - Identity and addressing types
//! - [`Record`], [`UnsignedRecord`] - Signed, append-only log entries
//! - [`Kind`] - Record kind discriminator
//! - [`Tags`], [`AttachmentTag`] - Routing, ordering and chunk metadata
//! - [`Filter`] - Subscription filters understood by relays
//! - [`TypeError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod filter;
mod ids;
mod kind;
mod record;
mod tags;

pub use error::TypeError;
pub use filter::Filter;
pub use ids::{PublicKey, RecordId};
pub use kind::Kind;
pub use record::{unix_now, Record, UnsignedRecord};
pub use tags::{AttachmentTag, Tag, Tags, MAX_ATTACHMENT_CHUNKS};
