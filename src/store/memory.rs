//! In-process record store

use super::{RecordStore, StoreResult};
use crate::reactive::lock;
use std::collections::HashMap;
use std::sync::Mutex;

/// `HashMap`-backed store, used for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    /// All keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.records).keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(lock(&self.records).get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        lock(&self.records).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        lock(&self.records).remove(key);
        Ok(())
    }
}
