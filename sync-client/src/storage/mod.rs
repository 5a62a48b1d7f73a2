//! Local key-value persistence.
//!
//! All durable state (offline queue, relation cache, feed chains, last-known
//! connectivity) is stored as JSON strings under the keys built by
//! [`keys`].

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use sync_types::UserId;

/// Trait for local key-value backends.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a value (deleting a missing key succeeds).
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Delete several values at once.
    async fn multi_remove(&self, keys: &[String]) -> StorageResult<()>;

    /// Every key starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Read and decode a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Encoding {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encoding {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw).await
}

/// Open the backend named by the `[storage]` section.
///
/// A database path selects SQLite; without one, state lives in memory.
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn KeyValueStore>> {
    match &config.database {
        Some(path) => {
            tracing::info!("Opening local store at {}", path.display());
            Ok(Arc::new(SqliteStore::new(path).await?))
        }
        None => {
            tracing::info!("No database configured, keeping local state in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Persisted key layout.
pub mod keys {
    use super::UserId;

    /// Last known connectivity state.
    pub const CONNECTIVITY: &str = "connectivity/last";

    /// Prefix of every key owned by `actor`.
    pub fn actor_prefix(actor: &UserId) -> String {
        format!("{actor}/")
    }

    /// Offline queue of `actor`.
    pub fn queue(actor: &UserId) -> String {
        format!("{actor}/queue")
    }

    /// Relation cache of `actor`.
    pub fn relations(actor: &UserId) -> String {
        format!("{actor}/relations")
    }

    /// List of persisted feed cache keys of `actor`.
    pub fn feed_index(actor: &UserId) -> String {
        format!("{actor}/feed/index")
    }

    /// Cached chain of one query of `actor`.
    pub fn feed(actor: &UserId, query_key: &str) -> String {
        format!("{actor}/feed/{query_key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn json_helpers_roundtrip() {
        let store = MemoryStore::new();
        let record = Record {
            name: "a".into(),
            count: 2,
        };
        set_json(&store, "k", &record).await.unwrap();
        let loaded: Option<Record> = get_json(&store, "k").await.unwrap();
        assert_eq!(loaded, Some(record));

        let missing: Option<Record> = get_json(&store, "nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn corrupt_value_is_encoding_error() {
        let store = MemoryStore::new();
        store.set("k", "{not json").await.unwrap();
        let result: StorageResult<Option<Record>> = get_json(&store, "k").await;
        assert!(matches!(result, Err(StorageError::Encoding { .. })));
    }

    #[tokio::test]
    async fn open_without_database_is_in_memory() {
        let store = open(&StorageConfig::default()).await.unwrap();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn key_layout() {
        let actor = UserId::new("alice");
        assert_eq!(keys::queue(&actor), "alice/queue");
        assert_eq!(keys::relations(&actor), "alice/relations");
        assert_eq!(keys::feed_index(&actor), "alice/feed/index");
        assert_eq!(keys::feed(&actor, "posts|x"), "alice/feed/posts|x");
        assert!(keys::feed(&actor, "q").starts_with(&keys::actor_prefix(&actor)));
    }
}
