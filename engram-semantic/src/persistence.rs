//! Small-blob persistence.
//!
//! Persona and core-principle state is persisted write-through as small JSON
//! blobs keyed per (user, agent). Keys are opaque strings; the file-backed
//! store maps them to files under a root directory.

use async_trait::async_trait;
use dashmap::DashMap;
use engram_core::error::{EngramError, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Trait for small-blob persistence.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Load a blob, `None` when the key has never been written.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a blob, replacing any previous value.
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// In-process blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|b| b.clone()))
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// File-backed blob store; one file per key under a root directory.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys may contain separators like "persona/user/agent"; flatten
        // them so every key maps to a single file.
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{sanitized}.json"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngramError::storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngramError::storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        debug!(key, path = %path.display(), "Persisting blob");
        fs::write(&path, bytes).await.map_err(|e| {
            EngramError::storage(format!("failed to write {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryBlobStore::new();
        assert!(store.load("missing").await.unwrap().is_none());

        store.save("k", b"v1").await.unwrap();
        store.save("k", b"v2").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());

        assert!(store.load("persona/alice/agent-1").await.unwrap().is_none());
        store
            .save("persona/alice/agent-1", br#"{"risk":"low"}"#)
            .await
            .unwrap();

        let loaded = store.load("persona/alice/agent-1").await.unwrap().unwrap();
        assert_eq!(loaded, br#"{"risk":"low"}"#);
    }

    #[tokio::test]
    async fn test_file_store_keys_do_not_collide_with_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());

        store.save("a/b", b"one").await.unwrap();
        store.save("a_b", b"one").await.unwrap();
        // Both keys flatten to the same sanitized name; last write wins.
        assert!(store.load("a/b").await.unwrap().is_some());
    }
}
