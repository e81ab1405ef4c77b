use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::fs;
use uuid::Uuid;

/// Filesystem store for uploaded document blobs. Stored names are fresh UUIDs
/// so user-supplied filenames never touch the filesystem.
#[derive(Clone)]
pub struct FileStore {
    root: Arc<PathBuf>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(self.root.as_ref())
            .await
            .with_context(|| format!("failed to create upload directory {}", self.root.display()))
    }

    /// Persist `bytes` under a fresh UUID name with the given extension and
    /// return the stored path.
    pub async fn save(&self, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.root.join(format!("{}.{extension}", Uuid::new_v4()));
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to persist upload to {}", path.display()))?;
        Ok(path)
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        fs::remove_file(path)
            .await
            .with_context(|| format!("failed to delete stored file {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.ensure_root().await.unwrap();

        let path = store.save("txt", b"hello").await.unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        store.remove(&path.to_string_lossy()).await.unwrap();
        assert!(!path.exists());

        // removing again reports the failure instead of masking it
        assert!(store.remove(&path.to_string_lossy()).await.is_err());
    }
}
