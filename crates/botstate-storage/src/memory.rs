//! In-memory storage for testing and single-process state

use async_trait::async_trait;
use botstate_core::{
    check_key, etag, validate, Document, Result, Storage, StoreItem, StoreItems, WriteFailures,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// An in-memory store.
///
/// Every operation runs under one lock, so a read never observes half of a
/// write batch. Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    records: Arc<RwLock<HashMap<String, Document>>>,
}

impl MemoryStorage {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records stored
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// List all keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove all records
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    #[instrument(skip(self))]
    async fn read(&self, keys: &[&str]) -> Result<StoreItems> {
        for key in keys {
            check_key(key)?;
        }

        let records = self.records.read();
        let mut items = StoreItems::new();
        for key in keys {
            match records.get(*key) {
                Some(document) => {
                    items.insert(*key, document.clone());
                }
                None => debug!(key = %key, "Key not found"),
            }
        }
        Ok(items)
    }

    #[instrument(skip(self, items), fields(batch = items.len()))]
    async fn write(&self, items: &mut StoreItems) -> Result<()> {
        let mut failures = WriteFailures::new();
        let mut records = self.records.write();

        for (key, document) in items.iter_mut() {
            if let Err(e) = check_key(key) {
                failures.record_failure(key.clone(), e);
                continue;
            }

            let current = records.get(key.as_str()).map(|stored| stored.e_tag());
            match validate(key, current, document.e_tag()) {
                Ok(precondition) => {
                    let e_tag = etag::generate_for(document.fields());
                    document.set_e_tag(e_tag);
                    records.insert(key.clone(), document.clone());
                    debug!(key = %key, ?precondition, e_tag = %document.e_tag(), "Record written");
                    failures.record_written(key.clone());
                }
                Err(e) => failures.record_failure(key.clone(), e),
            }
        }

        failures.into_result()
    }

    #[instrument(skip(self))]
    async fn delete(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            check_key(key)?;
        }

        let mut records = self.records.write();
        for key in keys {
            if records.remove(*key).is_some() {
                debug!(key = %key, "Record deleted");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botstate_core::{ErrorKind, StorageExt, WILDCARD_ETAG};
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStorage::new();

        let mut doc = Document::new().with_field("id", "1");
        store.write_one("a", &mut doc).await.unwrap();
        assert!(!doc.e_tag().is_empty());

        let read = store.read_one("a").await.unwrap().unwrap();
        assert_eq!(read, doc);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_read_returns_copies() {
        let store = MemoryStorage::new();
        store
            .write_one("a", &mut Document::new().with_field("count", 1))
            .await
            .unwrap();

        let mut read = store.read_one("a").await.unwrap().unwrap();
        read.set_field("count", 99);

        let again = store.read_one("a").await.unwrap().unwrap();
        assert_eq!(again.field("count"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_memory_store_conflict_keeps_presented_etag() {
        let store = MemoryStorage::new();
        store.write_one("a", &mut Document::new()).await.unwrap();

        let mut stale = Document::new().with_e_tag("stale");
        let err = store.write_one("a", &mut stale).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert_eq!(stale.e_tag(), "stale");
    }

    #[tokio::test]
    async fn test_memory_store_wildcard_never_persisted() {
        let store = MemoryStorage::new();
        store.write_one("a", &mut Document::new()).await.unwrap();

        let mut forced = Document::new().with_e_tag(WILDCARD_ETAG);
        store.write_one("a", &mut forced).await.unwrap();

        let read = store.read_one("a").await.unwrap().unwrap();
        assert_ne!(read.e_tag(), WILDCARD_ETAG);
        assert_eq!(read.e_tag(), forced.e_tag());
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_state() {
        let store = MemoryStorage::new();
        let clone = store.clone();

        store.write_one("a", &mut Document::new()).await.unwrap();
        assert!(clone.read_one("a").await.unwrap().is_some());

        clone.clear();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_empty_key_rejected() {
        let store = MemoryStorage::new();
        let err = store.read(&[""]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);

        let err = store.write_one("", &mut Document::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
        assert!(store.keys().is_empty());
    }
}
