//! Node records with per-node change notification

use super::node::MessageNode;
use crate::reactive::{lock, ReactiveCell, Subscription};
use crate::store::{RecordStore, RecordStoreExt, StoreResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Reads and writes node records, notifying per-node watchers on every change.
///
/// Writes go through one guard so a read-modify-write in `update` cannot
/// interleave with a `remove` of the same record.
pub struct NodeStore {
    records: Arc<dyn RecordStore>,
    watchers: Mutex<HashMap<String, ReactiveCell<MessageNode>>>,
    writes: Mutex<()>,
}

impl NodeStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            watchers: Mutex::new(HashMap::new()),
            writes: Mutex::new(()),
        }
    }

    /// Current record for `id`; an empty node with that id if none is stored
    pub fn get(&self, id: &str) -> MessageNode {
        let mut node: MessageNode = self.records.get(id);
        if node.id.is_empty() {
            node.id = id.to_string();
        }
        node
    }

    /// Record for `id` only if one is stored
    pub fn find(&self, id: &str) -> StoreResult<Option<MessageNode>> {
        self.records.try_get(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        matches!(self.records.contains(id), Ok(true))
    }

    /// Overwrite the record and notify watchers
    pub fn put(&self, node: &MessageNode) -> StoreResult<()> {
        {
            let _guard = lock(&self.writes);
            self.records.set(&node.id, node)?;
        }
        self.notify(&node.id, node.clone());
        Ok(())
    }

    /// Modify a stored record in place. Records that no longer exist are left
    /// alone, so a late write cannot resurrect a deleted node.
    pub fn update(&self, id: &str, change: impl FnOnce(&mut MessageNode)) -> StoreResult<bool> {
        let node = {
            let _guard = lock(&self.writes);
            let Some(mut node) = self.find(id)? else {
                return Ok(false);
            };
            change(&mut node);
            self.records.set(id, &node)?;
            node
        };
        self.notify(id, node);
        Ok(true)
    }

    /// Erase the record; watchers see an empty node
    pub fn remove(&self, id: &str) -> StoreResult<()> {
        {
            let _guard = lock(&self.writes);
            self.records.remove(id)?;
        }
        let watcher = lock(&self.watchers).remove(id);
        if let Some(cell) = watcher {
            let empty = MessageNode {
                id: id.to_string(),
                ..MessageNode::default()
            };
            cell.set(move |_| empty);
        }
        Ok(())
    }

    /// Listen for writes to node `id`
    pub fn subscribe(
        &self,
        id: &str,
        listener: impl Fn(&MessageNode) + Send + Sync + 'static,
    ) -> Subscription {
        let cell = {
            let mut watchers = lock(&self.watchers);
            watchers
                .entry(id.to_string())
                .or_insert_with(|| ReactiveCell::new(self.get(id)))
                .clone()
        };
        cell.subscribe(listener)
    }

    fn notify(&self, id: &str, node: MessageNode) {
        let watcher = lock(&self.watchers).get(id).cloned();
        if let Some(cell) = watcher {
            cell.set(move |_| node);
        }
    }
}
