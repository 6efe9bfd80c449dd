//! Payload object stores.
//!
//! Objects are byte blobs addressed by `(bucket, key)`. Keys use `/` as the
//! separator on every platform.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short name for logs and health output.
    fn backend_name(&self) -> &'static str;

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Write an object. Readers never observe a partially written object.
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> StoreResult<()>;

    /// Remove an object. Returns false if it did not exist.
    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool>;

    /// Keys in `bucket` starting with `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>>;

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<()>;
}

// ============================================================================
// Local filesystem store
// ============================================================================

/// Filesystem store rooted at `root/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self::new(root);
        tokio::fs::create_dir_all(&store.root)
            .await
            .map_err(|e| StoreError::io(&store.root, e))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> StoreResult<PathBuf> {
        if bucket.is_empty() || !is_plain_relative(Path::new(bucket)) || bucket.contains('/') {
            return Err(StoreError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if key.is_empty() || key.ends_with('/') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let mut path = dir;
        for segment in key.split('/') {
            if segment.is_empty() || !is_plain_relative(Path::new(segment)) {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

/// Only normal components: no root, no `..`, no `.`.
fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Staging name for an in-flight write: `.<file>.<uuid>.tmp`.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()))
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(bucket, key))
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        // Write to temp file first for atomic rename
        let temp_path = temp_path_for(&path);
        if let Err(e) = tokio::fs::write(&temp_path, data).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::io(temp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            if tokio::fs::remove_file(&temp_path).await.is_ok() {
                warn!("Cleaned up orphaned temp file: {}", temp_path.display());
            }
            return Err(StoreError::io(path, e));
        }
        debug!("Stored {} bytes at {}/{}", data.len(), bucket, key);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let mut keys = Vec::new();
        let mut pending = vec![(bucket_dir, String::new())];

        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&dir, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if relative.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", relative, name)
                };
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(entry.path(), e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if !is_temp_name(&name) && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn ping(&self) -> StoreResult<()> {
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }
}
