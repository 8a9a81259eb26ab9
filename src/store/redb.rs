//! Embedded on-disk key/value store backed by redb.
//!
//! redb provides ACID transactions; every `put` commits its own write
//! transaction, and writers are serialized by the database.

use std::path::Path;

use ::redb::{Database, ReadableDatabase, TableDefinition};
use tracing::{debug, info};

use super::{KvStore, StoreError};

const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

fn backend<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Backend(format!("{}: {}", context, e))
}

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open the database at `path`, creating the file and its table if they
    /// do not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let tx = db
            .begin_write()
            .map_err(backend("failed to begin transaction"))?;
        tx.open_table(ENTRIES_TABLE)
            .map_err(backend("failed to create entries table"))?;
        tx.commit()
            .map_err(backend("failed to commit transaction"))?;

        info!(path = %path.display(), "Opened job store");
        Ok(Self { db })
    }
}

impl KvStore for RedbStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let tx = self
            .db
            .begin_write()
            .map_err(backend("failed to begin transaction"))?;
        {
            let mut table = tx
                .open_table(ENTRIES_TABLE)
                .map_err(backend("failed to open entries table"))?;
            table
                .insert(key, value)
                .map_err(backend("failed to insert entry"))?;
        }
        tx.commit()
            .map_err(backend("failed to commit transaction"))?;

        debug!(key, bytes = value.len(), "Stored entry");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let tx = self
            .db
            .begin_read()
            .map_err(backend("failed to begin transaction"))?;
        let table = tx
            .open_table(ENTRIES_TABLE)
            .map_err(backend("failed to open entries table"))?;

        let value = table.get(key).map_err(backend("failed to read entry"))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let tx = self
            .db
            .begin_read()
            .map_err(backend("failed to begin transaction"))?;
        let table = tx
            .open_table(ENTRIES_TABLE)
            .map_err(backend("failed to open entries table"))?;

        let mut entries = Vec::new();
        for item in table
            .range(prefix..)
            .map_err(backend("failed to scan entries"))?
        {
            let (key, value) = item.map_err(backend("failed to read entry"))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }
}
