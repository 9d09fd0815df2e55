//! Relay transport abstraction.
//!
//! The transport owns relay connections and subscription bookkeeping. The
//! session only needs four operations:
//!
//! - `connect()` opens connections to the configured relays
//! - `subscribe()` opens a named subscription and returns its record stream
//! - `close_subscription()` ends a named subscription (its stream closes)
//! - `publish()` sends a signed record to the relays
//!
//! Reopening a name replaces the previous subscription of that name.

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use chat_types::{Filter, Record};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No relay could be reached.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// No relay accepted the subscription.
    #[error("subscription {name} failed: {reason}")]
    SubscriptionFailed {
        /// Subscription name.
        name: String,
        /// Reason reported by the transport.
        reason: String,
    },

    /// Publishing failed on every relay.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// A record as delivered by one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    /// The record.
    pub record: Record,
    /// Relay it came from.
    pub relay_url: String,
}

/// An open subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Name the subscription was opened under.
    pub name: String,
    /// Matching records, stored and live. Closes when the subscription ends.
    pub records: mpsc::Receiver<RelayRecord>,
}

/// Relay pool operations used by the session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the given relays.
    async fn connect(&self, relays: &[String]) -> Result<(), TransportError>;

    /// Open (or reopen) a named subscription.
    async fn subscribe(&self, name: &str, filter: Filter) -> Result<Subscription, TransportError>;

    /// Close a named subscription. Closing an unknown name is a no-op.
    async fn close_subscription(&self, name: &str) -> Result<(), TransportError>;

    /// Publish a signed record.
    async fn publish(&self, record: &Record) -> Result<(), TransportError>;
}
