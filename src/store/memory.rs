//! In-memory blob store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{key_components, BlobStore};
use crate::error::StoreError;

/// A stored object together with the content type it was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps every object in a map. Used by tests and dry runs.
///
/// Keys are validated the same way [`super::FsBlobStore`] validates them.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Full stored object, including its content type.
    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        key_components(key)?;
        let object = StoredObject {
            bytes,
            content_type: content_type.to_string(),
        };
        self.objects.lock().await.insert(key.to_string(), object);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        key_components(key)?;
        self.objects
            .lock()
            .await
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overwrite_keeps_last_value() {
        let store = MemoryBlobStore::new();
        store.put("k", b"one".to_vec(), "text/plain").await.unwrap();
        store.put("k", b"two".to_vec(), "application/pdf").await.unwrap();
        let object = store.object("k").await.unwrap();
        assert_eq!(object.bytes, b"two");
        assert_eq!(object.content_type, "application/pdf");
        assert_eq!(store.keys().await, vec!["k"]);
    }

    #[tokio::test]
    async fn test_rejects_invalid_keys() {
        let store = MemoryBlobStore::new();
        let err = store.put("m1/../x", b"x".to_vec(), "text/plain").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert!(matches!(store.get("a\\b").await, Err(StoreError::InvalidKey(_))));
        assert!(store.keys().await.is_empty());
    }
}
