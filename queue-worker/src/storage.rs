//! Storage collaborator interface.
//!
//! The queue core treats persistence as an opaque external store: records
//! are JSON documents keyed by entity kind and a stable numeric id.
//! Processors upsert by key so reprocessing the same message under
//! at-least-once delivery cannot corrupt state.
//!
//! Implementations must be safe for concurrent use from multiple consumer
//! tasks; the core adds no locking of its own.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Entity namespaces within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    App,
    Package,
    Bundle,
    Player,
    Change,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::App => "app",
            EntityKind::Package => "package",
            EntityKind::Bundle => "bundle",
            EntityKind::Player => "player",
            EntityKind::Change => "change",
        }
    }
}

/// Read/upsert access to the external store.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, kind: EntityKind, id: u64) -> Result<Option<Value>>;

    async fn upsert(&self, kind: EntityKind, id: u64, record: Value) -> Result<()>;

    /// Batch lookup; ids absent from the store are simply missing from the
    /// returned map.
    async fn batch_get(&self, kind: EntityKind, ids: &[u64]) -> Result<HashMap<u64, Value>>;
}

/// In-memory store used by tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(EntityKind, u64), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Snapshot of every record, for test assertions.
    pub fn dump(&self) -> HashMap<(EntityKind, u64), Value> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get(&self, kind: EntityKind, id: u64) -> Result<Option<Value>> {
        Ok(self.records.lock().unwrap().get(&(kind, id)).cloned())
    }

    async fn upsert(&self, kind: EntityKind, id: u64, record: Value) -> Result<()> {
        self.records.lock().unwrap().insert((kind, id), record);
        Ok(())
    }

    async fn batch_get(&self, kind: EntityKind, ids: &[u64]) -> Result<HashMap<u64, Value>> {
        let records = self.records.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| records.get(&(kind, *id)).map(|r| (*id, r.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_upsert_overwrites() {
        let store = MemoryStore::new();
        store.upsert(EntityKind::App, 730, json!({"v": 1})).await.unwrap();
        store.upsert(EntityKind::App, 730, json!({"v": 2})).await.unwrap();
        let record = store.get(EntityKind::App, 730).await.unwrap().unwrap();
        assert_eq!(record["v"], 2);
        assert_eq!(store.dump().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_batch_get_skips_misses() {
        let store = MemoryStore::new();
        store.upsert(EntityKind::Package, 1, json!({"name": "a"})).await.unwrap();
        let found = store.batch_get(EntityKind::Package, &[1, 2]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&1));
    }

    #[tokio::test]
    async fn test_kinds_are_namespaced() {
        let store = MemoryStore::new();
        store.upsert(EntityKind::App, 7, json!({"kind": "app"})).await.unwrap();
        assert!(store.get(EntityKind::Package, 7).await.unwrap().is_none());
    }
}
