// Artifact store: revisioned key-value persistence for check state.
// Writes are conditional on the revision the caller read, so overlapping
// invocations lose a conflict instead of losing an update.

pub mod bucket;

pub use bucket::{BucketConfig, BucketStore};

use crate::errors::StoreError;
use crate::models::ArtifactRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// A record together with the revision it was read at
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub revision: u64,
}

/// Durable key-value store for artifact records
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Load the record stored under `key`, if any, with its revision.
    async fn load(&self, key: &str) -> Result<Option<Versioned<ArtifactRecord>>, StoreError>;

    /// Store `record` under `key` if the current revision matches
    /// `expected` (None means the key must not exist yet). Returns the new
    /// revision, or `StoreError::Conflict` when another writer got there
    /// first.
    async fn save(
        &self,
        key: &str,
        record: &ArtifactRecord,
        expected: Option<u64>,
    ) -> Result<u64, StoreError>;
}

/// In-memory store used by tests and stateful runs of the minimal profile
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, (ArtifactRecord, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Versioned<ArtifactRecord>>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(key).map(|(record, revision)| Versioned {
            value: record.clone(),
            revision: *revision,
        }))
    }

    async fn save(
        &self,
        key: &str,
        record: &ArtifactRecord,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let found = records.get(key).map(|(_, revision)| *revision);

        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }

        let next = found.map_or(1, |r| r + 1);
        records.insert(key.to_string(), (record.clone(), next));
        debug!(key = %key, revision = next, "Artifact record saved");
        Ok(next)
    }
}
