//! The key-value store interface and its in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::StoreError;

/// A string-keyed, string-valued store shared by every server process.
///
/// Values are opaque strings; callers serialize their own records (the
/// room directory stores JSON). There is no cross-key transaction.
/// [`compare_and_set`](Self::compare_and_set) is the only atomic
/// primitive, and it is what callers must use for read-modify-write
/// updates on a shared key.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Returns the value at `key`, or `None` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally writes `value` at `key` (last write wins).
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Removes `key`. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Writes `value` at `key` only if the current value equals
    /// `expected` (`None` meaning "key absent"). Returns `true` if the
    /// write happened.
    ///
    /// Backends must make the comparison and the write a single atomic
    /// step with respect to every other writer in the cluster.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool, StoreError>;
}

/// An in-process [`KeyValueStore`].
///
/// Clones share the same underlying map, so handing clones to several
/// `RoomDirectory` instances behaves like several processes talking to one
/// store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all keys, sorted. Intended for inspection in tests and
    /// debugging tools.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns `true` if the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool, StoreError> {
        // The lock is held across the comparison and the write.
        let mut entries = self.entries.lock().await;
        if entries.get(key).map(String::as_str) != expected {
            tracing::trace!(key, "compare-and-set lost the race");
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("k", "v".into()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        store.set("k", "v".into()).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_compare_and_set_on_absent_key() {
        let store = MemoryStore::new();
        assert!(store.compare_and_set("k", None, "a".into()).await.unwrap());
        // Key now exists, so "expect absent" must fail.
        assert!(!store.compare_and_set("k", None, "b".into()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_compare_and_set_stale_expectation_fails() {
        let store = MemoryStore::new();
        store.set("k", "v1".into()).await.unwrap();
        store.set("k", "v2".into()).await.unwrap();

        assert!(!store.compare_and_set("k", Some("v1"), "v3".into()).await.unwrap());
        assert!(store.compare_and_set("k", Some("v2"), "v3".into()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.set("shared", "1".into()).await.unwrap();
        assert_eq!(b.get("shared").await.unwrap().as_deref(), Some("1"));
        assert_eq!(b.keys().await, vec!["shared".to_string()]);
    }
}
