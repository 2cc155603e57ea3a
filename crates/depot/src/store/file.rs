//! # File Store
//!
//! This module implements a file-backed persistent content store.
//!
//! Keys are hashed to stable file names, so arbitrary key strings (including
//! path separators and wildcard characters) are safe to store. Each entry is
//! a pair of files: `<hash>.entry` holding the content and `<hash>.key`
//! holding the original key so [`ContentStore::list`] can recover it.

use std::path::PathBuf;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use super::ContentStore;

#[derive(Debug, Clone)]
pub struct FileStore {
    store_dir: PathBuf,
    initialized: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl FileStore {
    /// Create a new file store rooted at the specified directory
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            initialized: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Initialize the store directory
    pub(crate) async fn ensure_initialized(&self) -> io::Result<()> {
        use std::sync::atomic::Ordering;

        // Fast path - already initialized
        if self.initialized.load(Ordering::Relaxed) {
            return Ok(());
        }

        // Use compare_exchange to ensure only one task initializes
        if self
            .initialized
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            fs::create_dir_all(&self.store_dir).await?;
            self.initialized.store(true, Ordering::Release);
        } else {
            while !self.initialized.load(Ordering::Acquire) {
                tokio::task::yield_now().await;
            }
        }

        Ok(())
    }

    fn hashed_name(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        format!("{hash:x}")
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.store_dir
            .join(format!("{}.entry", Self::hashed_name(key)))
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.store_dir
            .join(format!("{}.key", Self::hashed_name(key)))
    }
}

#[async_trait::async_trait]
impl ContentStore for FileStore {
    async fn get(&self, key: &str) -> io::Result<Option<Bytes>> {
        self.ensure_initialized().await?;

        match fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> io::Result<()> {
        self.ensure_initialized().await?;

        let entry_path = self.entry_path(key);
        let key_path = self.key_path(key);

        // Write to temporary files then rename, so a concurrent reader never
        // observes a partially written entry.
        let temp_entry_path = entry_path.with_extension("entry.tmp");
        let temp_key_path = key_path.with_extension("key.tmp");

        if let Err(e) = fs::write(&temp_entry_path, &data).await {
            warn!(path = ?temp_entry_path, error = %e, "Failed to write store entry file");
            return Err(e);
        }

        if let Err(e) = fs::write(&temp_key_path, key.as_bytes()).await {
            warn!(path = ?temp_key_path, error = %e, "Failed to write store key file");
            let _ = fs::remove_file(&temp_entry_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_entry_path, &entry_path).await {
            warn!(
                from = ?temp_entry_path,
                to = ?entry_path,
                error = %e,
                "Failed to rename temporary entry file"
            );
            let _ = fs::remove_file(&temp_entry_path).await;
            let _ = fs::remove_file(&temp_key_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_key_path, &key_path).await {
            warn!(
                from = ?temp_key_path,
                to = ?key_path,
                error = %e,
                "Failed to rename temporary key file"
            );
            let _ = fs::remove_file(&entry_path).await;
            let _ = fs::remove_file(&temp_key_path).await;
            return Err(e);
        }

        debug!(key = %key, "Stored entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        self.ensure_initialized().await?;

        let entry_result = fs::remove_file(self.entry_path(key)).await;
        let key_result = fs::remove_file(self.key_path(key)).await;

        match (entry_result, key_result) {
            (Err(e), _) if e.kind() != io::ErrorKind::NotFound => {
                warn!(key = %key, error = %e, "Failed to remove store entry file");
                Err(e)
            }
            (_, Err(e)) if e.kind() != io::ErrorKind::NotFound => {
                warn!(key = %key, error = %e, "Failed to remove store key file");
                Err(e)
            }
            _ => Ok(()),
        }
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        self.ensure_initialized().await?;

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.store_dir).await?;

        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("key") {
                continue;
            }

            // A key sidecar without its entry file is a leftover from an
            // interrupted remove; skip it.
            let key = match fs::read_to_string(&path).await {
                Ok(key) => key,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to read store key file, skipping");
                    continue;
                }
            };
            if fs::try_exists(path.with_extension("entry")).await? {
                keys.push(key);
            }
        }

        Ok(keys)
    }
}
