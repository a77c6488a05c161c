//! In-memory key-value store

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{DEFAULT_MAX_VALUE_BYTES, KeyValueStore, check_value_size};

/// Volatile store with the same size semantics as the SQLite store
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    max_value_bytes: usize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_value_bytes(DEFAULT_MAX_VALUE_BYTES)
    }

    pub fn with_max_value_bytes(max_value_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            max_value_bytes,
            writes: AtomicUsize::new(0),
        }
    }

    /// Write a value without the size check, for seeding rows an older build left behind
    pub async fn insert_unchecked(&self, key: &str, value: &str) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }

    /// Number of `set`/`remove` calls served so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(value) => {
                check_value_size(key, value.len(), self.max_value_bytes)?;
                Ok(Some(value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        check_value_size(key, value.len(), self.max_value_bytes)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn max_value_bytes(&self) -> usize {
        self.max_value_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_row_too_big;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_size_ceiling() {
        let store = MemoryStore::with_max_value_bytes(4);
        let err = store.set("big", "12345").await.unwrap_err();
        assert!(is_row_too_big(&err));

        store.insert_unchecked("legacy", "1234567").await;
        let err = store.get("legacy").await.unwrap_err();
        assert!(is_row_too_big(&err));
    }

    #[tokio::test]
    async fn test_prefix_scan_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        for key in ["p:b", "p:a", "q:a", "p", "p:c"] {
            store.set(key, "x").await.unwrap();
        }

        let keys = store.keys_with_prefix("p:").await.unwrap();
        assert_eq!(keys, vec!["p:a", "p:b", "p:c"]);
    }
}
