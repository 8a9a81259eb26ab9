//! Durable key/value persistence for job records.
//!
//! The coordinator only needs three primitives from the underlying engine:
//! point `put`, point `get`, and a prefix scan used once at startup. Records
//! live under `job:<id>` and are encoded as JSON.
//!
//! Backends:
//! - [`RedbStore`]: embedded on-disk store used by the coordinator process
//! - [`MemoryStore`]: volatile store for tests and ephemeral runs

mod memory;
mod redb;

pub use self::memory::MemoryStore;
pub use self::redb::RedbStore;

use std::sync::Arc;

use thiserror::Error;

use crate::scheduler::JobRecord;

/// Key prefix shared by every job record.
pub const JOB_KEY_PREFIX: &str = "job:";

pub fn job_key(id: &str) -> String {
    format!("{}{}", JOB_KEY_PREFIX, id)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("failed to encode record {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },

    #[error("failed to decode record {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
}

/// Raw key/value contract the persistence engine must honor.
///
/// Implementations serialize their own writes; callers may invoke `put`
/// concurrently from several tasks.
pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// Typed view over a [`KvStore`] that reads and writes [`JobRecord`]s.
#[derive(Clone)]
pub struct JobStore {
    kv: Arc<dyn KvStore>,
}

impl JobStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// A store backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let key = job_key(record.id());
        let bytes = serde_json::to_vec(record).map_err(|source| StoreError::Encode {
            key: key.clone(),
            source,
        })?;
        self.kv.put(&key, &bytes)
    }

    pub fn load(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let key = job_key(id);
        match self.kv.get(&key)? {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Every persisted job record. A record that fails to decode is returned
    /// as an error in its slot so one bad entry does not hide the others.
    pub fn load_all(&self) -> Result<Vec<Result<JobRecord, StoreError>>, StoreError> {
        let entries = self.kv.scan_prefix(JOB_KEY_PREFIX)?;
        Ok(entries
            .into_iter()
            .map(|(key, bytes)| decode(&key, &bytes))
            .collect())
    }
}

fn decode(key: &str, bytes: &[u8]) -> Result<JobRecord, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}
