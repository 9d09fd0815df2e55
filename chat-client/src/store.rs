//! Persistent record storage.
//!
//! The session writes every intake record before routing it and deletes
//! records that turn out to be unreadable, so a later bootstrap replays only
//! records that were accepted once. [`MemoryRecordStore`] backs tests.

use async_trait::async_trait;
use chat_types::{Record, RecordId};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A record could not be (de)serialized.
    #[error("record encoding error: {0}")]
    Encoding(#[from] chat_types::TypeError),
}

/// Trait for record storage keyed by record id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a record seen on `relay_url`.
    ///
    /// Returns `Ok(true)` if the record was new, `Ok(false)` if it was
    /// already stored (the relay is still remembered as a source).
    async fn add_record(&self, record: &Record, relay_url: &str) -> Result<bool, StoreError>;

    /// Every stored record, oldest first.
    async fn all_records(&self) -> Result<Vec<Record>, StoreError>;

    /// Remove a record.
    ///
    /// Returns `Ok(true)` if removed, `Ok(false)` if not found.
    async fn remove_record(&self, id: &RecordId) -> Result<bool, StoreError>;

    /// Check if a record is stored.
    async fn contains(&self, id: &RecordId) -> bool;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: Record,
    sources: BTreeSet<String>,
}

/// In-memory record store for testing.
///
/// Not persistent - all data is lost when the store is dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<HashMap<RecordId, StoredRecord>>>,
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Relays a record has been seen on, sorted.
    pub fn sources(&self, id: &RecordId) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .get(id)
            .map(|stored| stored.sources.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn add_record(&self, record: &Record, relay_url: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&record.id) {
            Some(stored) => {
                stored.sources.insert(relay_url.to_string());
                Ok(false)
            }
            None => {
                records.insert(
                    record.id,
                    StoredRecord {
                        record: record.clone(),
                        sources: BTreeSet::from([relay_url.to_string()]),
                    },
                );
                Ok(true)
            }
        }
    }

    async fn all_records(&self) -> Result<Vec<Record>, StoreError> {
        let mut all: Vec<Record> = self
            .records
            .lock()
            .unwrap()
            .values()
            .map(|stored| stored.record.clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn remove_record(&self, id: &RecordId) -> Result<bool, StoreError> {
        Ok(self.records.lock().unwrap().remove(id).is_some())
    }

    async fn contains(&self, id: &RecordId) -> bool {
        self.records.lock().unwrap().contains_key(id)
    }
}
