//! Mock transport for testing.
//!
//! Behaves like a single in-memory relay: records that are published or
//! injected are stored, replayed to new subscriptions that match, and pushed
//! to live subscriptions. Also captures what was published and lets tests
//! force failures.
//!
//! Delivered records report the first relay URL the receiving connection
//! connected to, or [`MOCK_RELAY_URL`] before any `connect()`.
//!
//! Clones share one connection. [`MockTransport::connect_peer`] opens a
//! second connection to the same relay with its own subscription names.

use super::{RelayRecord, Subscription, Transport, TransportError};
use async_trait::async_trait;
use chat_types::{Filter, Record};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// URL reported for every record delivered by the mock.
pub const MOCK_RELAY_URL: &str = "mock://relay";

const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Mock transport for testing.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    connection: u64,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    stored: Vec<Record>,
    published: Vec<Record>,
    connections: u64,
    relays: HashMap<u64, Vec<String>>,
    live: HashMap<(u64, String), (Filter, mpsc::Sender<RelayRecord>)>,
    opened: Vec<(u64, String, Filter)>,
    fail_next_connect: Option<String>,
    fail_next_subscribe: Option<String>,
    fail_next_publish: Option<String>,
}

fn relay_url(relays: &HashMap<u64, Vec<String>>, connection: u64) -> String {
    relays
        .get(&connection)
        .and_then(|urls| urls.first())
        .map_or_else(|| MOCK_RELAY_URL.to_string(), Clone::clone)
}

impl MockTransportInner {
    fn deliver(&mut self, record: &Record) {
        let relays = &self.relays;
        self.live.retain(|(connection, name), (filter, sender)| {
            if !filter.matches(record) {
                return !sender.is_closed();
            }
            match sender.try_send(RelayRecord {
                record: record.clone(),
                relay_url: relay_url(relays, *connection),
            }) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscription = %name, "mock subscription full, record dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Another connection to the same relay.
    pub fn connect_peer(&self) -> Self {
        let mut inner = self.inner.lock().unwrap();
        inner.connections += 1;
        Self {
            inner: self.inner.clone(),
            connection: inner.connections,
        }
    }

    /// Store a record as if another client had published it.
    pub fn inject(&self, record: Record) {
        let mut inner = self.inner.lock().unwrap();
        inner.deliver(&record);
        inner.stored.push(record);
    }

    /// Relays this connection was last connected to.
    pub fn connected_relays(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.relays.get(&self.connection).cloned().unwrap_or_default()
    }

    /// Get all records that were published through this transport.
    pub fn published(&self) -> Vec<Record> {
        let inner = self.inner.lock().unwrap();
        inner.published.clone()
    }

    /// Names of this connection's open subscriptions, sorted.
    pub fn open_subscriptions(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner
            .live
            .keys()
            .filter(|(connection, _)| *connection == self.connection)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every `subscribe()` call on this connection so far, in order.
    pub fn subscribe_log(&self) -> Vec<(String, Filter)> {
        let inner = self.inner.lock().unwrap();
        inner
            .opened
            .iter()
            .filter(|(connection, _, _)| *connection == self.connection)
            .map(|(_, name, filter)| (name.clone(), filter.clone()))
            .collect()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_connect = Some(error.to_string());
    }

    /// Cause the next subscribe() to fail with the given error.
    pub fn fail_next_subscribe(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_subscribe = Some(error.to_string());
    }

    /// Cause the next publish() to fail with the given error.
    pub fn fail_next_publish(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_publish = Some(error.to_string());
    }

    /// End every open subscription on every connection.
    pub fn close_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.live.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, relays: &[String]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectFailed(error));
        }

        inner.relays.insert(self.connection, relays.to_vec());
        Ok(())
    }

    async fn subscribe(&self, name: &str, filter: Filter) -> Result<Subscription, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(reason) = inner.fail_next_subscribe.take() {
            return Err(TransportError::SubscriptionFailed {
                name: name.to_string(),
                reason,
            });
        }

        let matching: Vec<&Record> = inner.stored.iter().filter(|r| filter.matches(r)).collect();
        let (sender, receiver) = mpsc::channel(matching.len().max(SUBSCRIPTION_CAPACITY));
        let relay_url = relay_url(&inner.relays, self.connection);
        for record in matching {
            if sender
                .try_send(RelayRecord {
                    record: record.clone(),
                    relay_url: relay_url.clone(),
                })
                .is_err()
            {
                tracing::warn!(subscription = %name, "mock replay could not queue stored record");
            }
        }
        inner.opened.push((self.connection, name.to_string(), filter.clone()));
        inner
            .live
            .insert((self.connection, name.to_string()), (filter, sender));

        Ok(Subscription {
            name: name.to_string(),
            records: receiver,
        })
    }

    async fn close_subscription(&self, name: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.live.remove(&(self.connection, name.to_string()));
        Ok(())
    }

    async fn publish(&self, record: &Record) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_publish.take() {
            return Err(TransportError::PublishFailed(error));
        }

        inner.published.push(record.clone());
        inner.deliver(record);
        inner.stored.push(record.clone());
        Ok(())
    }
}
