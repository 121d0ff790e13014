//! Initial-state snapshots pushed after authentication.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

use crate::types::Identity;

/// Source of the `user_data` snapshot sent to a freshly registered client.
///
/// Backed by the persistence layer in production. Returning `None` (no
/// record, lookup failure) skips the snapshot; the connection stays open.
pub trait SnapshotSource: Send + Sync + 'static {
    fn snapshot<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, Option<Value>>;
}

/// Never produces a snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshots;

impl SnapshotSource for NoSnapshots {
    fn snapshot<'a>(&'a self, _identity: &'a Identity) -> BoxFuture<'a, Option<Value>> {
        Box::pin(async { None })
    }
}

/// Snapshots held in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshots {
    records: RwLock<HashMap<Identity, Value>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the snapshot for `identity`.
    pub fn insert(&self, identity: Identity, snapshot: Value) {
        self.records.write().insert(identity, snapshot);
    }

    pub fn remove(&self, identity: &str) -> Option<Value> {
        self.records.write().remove(identity)
    }
}

impl SnapshotSource for MemorySnapshots {
    fn snapshot<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, Option<Value>> {
        let record = self.records.read().get(identity).cloned();
        Box::pin(async move { record })
    }
}
