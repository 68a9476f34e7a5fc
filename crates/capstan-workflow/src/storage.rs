//! Key/value storage trait
//!
//! Task records are persisted through this interface. Implementations can
//! back onto any key/value engine; an in-memory implementation ships here
//! for tests and embedded use.

use crate::error::StorageError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Bucket holding task records
pub const TASKS_BUCKET: &str = "tasks";

/// Trait for key/value persistence
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// All values in a bucket, in key order.
    async fn get_all(&self, bucket: &str) -> Result<Vec<Vec<u8>>, StorageError>;
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.buckets
            .write()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .buckets
            .read()
            .unwrap()
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        if let Some(b) = self.buckets.write().unwrap().get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    async fn get_all(&self, bucket: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        Ok(self
            .buckets
            .read()
            .unwrap()
            .get(bucket)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();

        assert!(storage.get("tasks", "a").await.unwrap().is_none());

        storage.put("tasks", "a", b"one").await.unwrap();
        storage.put("tasks", "b", b"two").await.unwrap();

        assert_eq!(storage.get("tasks", "a").await.unwrap().unwrap(), b"one");

        let all = storage.get_all("tasks").await.unwrap();
        assert_eq!(all, vec![b"one".to_vec(), b"two".to_vec()]);

        storage.delete("tasks", "a").await.unwrap();
        assert!(storage.get("tasks", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage_buckets_are_isolated() {
        let storage = MemoryStorage::new();
        storage.put("tasks", "k", b"task").await.unwrap();
        storage.put("kubes", "k", b"kube").await.unwrap();

        assert_eq!(storage.get("tasks", "k").await.unwrap().unwrap(), b"task");
        assert_eq!(storage.get("kubes", "k").await.unwrap().unwrap(), b"kube");

        assert!(storage.get_all("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage_overwrites() {
        let storage = MemoryStorage::new();
        storage.put("tasks", "k", b"v1").await.unwrap();
        storage.put("tasks", "k", b"v2").await.unwrap();

        assert_eq!(storage.get("tasks", "k").await.unwrap().unwrap(), b"v2");
        assert_eq!(storage.get_all("tasks").await.unwrap().len(), 1);
    }
}
