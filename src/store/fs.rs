//! Filesystem-backed blob store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{key_components, BlobStore};
use crate::error::StoreError;

/// Stores each key as a file below a root directory.
///
/// The content type is not persisted.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to its file path below the root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.root.clone();
        for component in key_components(key)? {
            path.push(component);
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(key, e))?;
        }
        debug!(key, size = bytes.len(), content_type, "Writing object");
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::io(key, e))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(StoreError::io(key, e)),
        }
    }
}
