//! Durable record storage
//!
//! Records are JSON documents addressed by a string key. Each key is written
//! independently; nothing here spans more than one key.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Record encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Raw key-value backend holding serialized records
pub trait RecordStore: Send + Sync {
    /// Load the serialized record for `key`, `None` if absent
    fn load(&self, key: &str) -> StoreResult<Option<String>>;

    /// Overwrite the record for `key`
    fn save(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete the record for `key`; deleting a missing key is not an error
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Typed access on top of any [`RecordStore`]
pub trait RecordStoreExt: RecordStore {
    /// Read and decode a record, `Ok(None)` if the key is absent
    fn try_get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.load(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read a record, falling back to `T::default()` when it is missing or unreadable
    fn get<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.try_get(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Unreadable record, using default");
                T::default()
            }
        }
    }

    /// Serialize and fully overwrite a record
    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.save(key, &raw)
    }

    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.load(key)?.is_some())
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}
