//! Local filesystem transfer implementation.

use super::{hash_file, TransferOps};
use crate::error::{Error, Result};
use crate::lock::LockManager;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{instrument, trace};

pub struct LocalTransfer {
    locks: LockManager,
    lock_timeout: Duration,
}

impl LocalTransfer {
    pub fn new(lock_timeout: Duration, skip_locks: bool) -> Self {
        Self {
            locks: LockManager::new(skip_locks),
            lock_timeout,
        }
    }
}

#[async_trait]
impl TransferOps for LocalTransfer {
    #[instrument(skip(self))]
    async fn list(&self, path: &Path) -> Result<Vec<String>> {
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(source) => {
                return Err(Error::Transport {
                    operation: "list".to_string(),
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        while let Some(entry) = read_dir.next_entry().await.map_err(|source| Error::Transport {
            operation: "list".to_string(),
            path: path.display().to_string(),
            source,
        })? {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn compare(&self, cache: &Path, pool: &Path) -> Result<bool> {
        let cache_hash = hash_file(cache).await?;
        let pool_hash = hash_file(pool).await?;
        trace!(cache_hash, pool_hash, "compared local digests");
        Ok(cache_hash == pool_hash)
    }

    #[instrument(skip(self))]
    async fn download(&self, cache: &Path, pool: &Path) -> Result<()> {
        self.copy_locked(pool, cache, pool).await
    }

    #[instrument(skip(self))]
    async fn upload(&self, cache: &Path, pool: &Path) -> Result<()> {
        self.copy_locked(pool, cache, pool).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, pool: &Path) -> Result<()> {
        match tokio::fs::remove_file(pool).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Transport {
                operation: "delete".to_string(),
                path: pool.display().to_string(),
                source,
            }),
        }
    }
}

impl LocalTransfer {
    async fn copy_locked(&self, lock_on: &Path, dest: &Path, src: &Path) -> Result<()> {
        let lock_on = lock_on.to_path_buf();
        let dest = dest.to_path_buf();
        let src = src.to_path_buf();
        let timeout = self.lock_timeout;
        self.locks
            .with_lock(&lock_on, timeout, move || async move {
                let dest_hash = hash_file(&dest).await?;
                let src_hash = hash_file(&src).await?;
                if !dest_hash.is_empty() && dest_hash == src_hash {
                    return Ok(());
                }
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| Error::Transport {
                            operation: "create parent dir".to_string(),
                            path: parent.display().to_string(),
                            source,
                        })?;
                }
                tokio::fs::copy(&src, &dest)
                    .await
                    .map_err(|source| Error::Transport {
                        operation: "copy".to_string(),
                        path: dest.display().to_string(),
                        source,
                    })?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn download_copies_when_hash_differs() {
        let dir = tempfile::tempdir().unwrap();
        let pool = dir.path().join("pool.qcow2");
        let cache = dir.path().join("cache").join("img.qcow2");
        tokio::fs::write(&pool, b"hello").await.unwrap();

        let transfer = LocalTransfer::new(Duration::from_secs(5), false);
        transfer.download(&cache, &pool).await.unwrap();

        let content = tokio::fs::read(&cache).await.unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn compare_missing_files_are_equal() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let transfer = LocalTransfer::new(Duration::from_secs(5), false);
        assert!(transfer.compare(&a, &b).await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        let transfer = LocalTransfer::new(Duration::from_secs(5), false);
        transfer.delete(&path).await.unwrap();
    }
}
