//! In-memory key-value store for testing.
//!
//! Allows injecting failures and inspecting what was written.

use super::KeyValueStore;
use crate::error::{StorageError, StorageResult};
use crate::observe::lock;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// In-memory key-value store.
///
/// Clones share the same data, so a test can keep a handle while the
/// engine owns another.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    values: BTreeMap<String, String>,
    writes: usize,
    fail_next_set: Option<String>,
    fail_next_get: Option<String>,
    fail_writes: Option<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next `set()` to fail with the given error.
    pub fn fail_next_set(&self, error: &str) {
        lock(&self.inner).fail_next_set = Some(error.to_string());
    }

    /// Cause the next `get()` to fail with the given error.
    pub fn fail_next_get(&self, error: &str) {
        lock(&self.inner).fail_next_get = Some(error.to_string());
    }

    /// Make every write fail until cleared with `None`.
    pub fn fail_writes(&self, error: Option<&str>) {
        lock(&self.inner).fail_writes = error.map(str::to_string);
    }

    /// Raw stored value, bypassing failure injection.
    pub fn raw(&self, key: &str) -> Option<String> {
        lock(&self.inner).values.get(key).cloned()
    }

    /// All stored keys.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.inner).values.keys().cloned().collect()
    }

    /// Number of successful writes (set/remove) so far.
    pub fn write_count(&self) -> usize {
        lock(&self.inner).writes
    }

    fn check_write(inner: &mut MemoryStoreInner) -> StorageResult<()> {
        if let Some(error) = inner.fail_next_set.take() {
            return Err(StorageError::Backend(error));
        }
        if let Some(error) = &inner.fail_writes {
            return Err(StorageError::Backend(error.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut inner = lock(&self.inner);
        if let Some(error) = inner.fail_next_get.take() {
            return Err(StorageError::Backend(error));
        }
        Ok(inner.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut inner = lock(&self.inner);
        Self::check_write(&mut inner)?;
        inner.values.insert(key.to_string(), value.to_string());
        inner.writes += 1;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let mut inner = lock(&self.inner);
        if let Some(error) = &inner.fail_writes {
            return Err(StorageError::Backend(error.clone()));
        }
        inner.values.remove(key);
        inner.writes += 1;
        Ok(())
    }

    async fn multi_remove(&self, keys: &[String]) -> StorageResult<()> {
        let mut inner = lock(&self.inner);
        if let Some(error) = &inner.fail_writes {
            return Err(StorageError::Backend(error.clone()));
        }
        for key in keys {
            inner.values.remove(key);
        }
        inner.writes += 1;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let inner = lock(&self.inner);
        Ok(inner
            .values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.remove("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        store.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn fail_next_set_fails_once() {
        let store = MemoryStore::new();
        store.fail_next_set("disk full");
        let err = store.set("a", "1").await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(ref m) if m == "disk full"));
        assert!(store.raw("a").is_none());

        store.set("a", "1").await.unwrap();
        assert_eq!(store.raw("a").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn fail_writes_until_cleared() {
        let store = MemoryStore::new();
        store.fail_writes(Some("read-only"));
        assert!(store.set("a", "1").await.is_err());
        assert!(store.set("a", "1").await.is_err());
        store.fail_writes(None);
        store.set("a", "1").await.unwrap();
    }

    #[tokio::test]
    async fn prefix_listing_and_multi_remove() {
        let store = MemoryStore::new();
        store.set("alice/queue", "[]").await.unwrap();
        store.set("alice/feed/index", "[]").await.unwrap();
        store.set("bob/queue", "[]").await.unwrap();

        let keys = store.keys_with_prefix("alice/").await.unwrap();
        assert_eq!(keys, vec!["alice/feed/index", "alice/queue"]);

        store.multi_remove(&keys).await.unwrap();
        assert_eq!(store.keys(), vec!["bob/queue"]);
    }

    #[tokio::test]
    async fn clones_share_data() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", "v").await.unwrap();
        assert_eq!(other.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
