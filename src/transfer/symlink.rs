//! Symlink-mode cache transfer: the cache entry becomes a symlink to the
//! pool path rather than a byte copy.

use super::{hash_file, TransferOps};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::{instrument, warn};

pub struct SymlinkTransfer;

impl SymlinkTransfer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SymlinkTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferOps for SymlinkTransfer {
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
        match tokio::fs::read_link(cache).await {
            Ok(target) => Ok(target == pool),
            Err(_) => Ok(hash_file(cache).await? == hash_file(pool).await?),
        }
    }

    #[instrument(skip(self))]
    async fn download(&self, cache: &Path, pool: &Path) -> Result<()> {
        if let Some(parent) = cache.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Transport {
                    operation: "create cache dir".to_string(),
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        match tokio::fs::symlink_metadata(cache).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = tokio::fs::read_link(cache).await.ok();
                if target.as_deref() == Some(pool) {
                    return Ok(());
                }
                // dead or redirected symlink: replace it.
                tokio::fs::remove_file(cache)
                    .await
                    .map_err(|source| Error::Transport {
                        operation: "remove stale symlink".to_string(),
                        path: cache.display().to_string(),
                        source,
                    })?;
            }
            Ok(_non_symlink) => {
                return Err(Error::InvalidLocation {
                    location: cache.display().to_string(),
                    reason: "cache entry exists and is not a symlink".to_string(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(Error::Transport {
                    operation: "stat cache entry".to_string(),
                    path: cache.display().to_string(),
                    source,
                })
            }
        }

        tokio::fs::symlink(pool, cache)
            .await
            .map_err(|source| Error::Transport {
                operation: "symlink".to_string(),
                path: cache.display().to_string(),
                source,
            })
    }

    #[instrument(skip(self))]
    async fn upload(&self, cache: &Path, _pool: &Path) -> Result<()> {
        warn!(path = %cache.display(), "refusing upload from a symlink-mode source");
        Err(Error::InvalidLocation {
            location: cache.display().to_string(),
            reason: "upload from a symlink-mode source is not permitted".to_string(),
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn download_creates_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let pool = dir.path().join("pool.qcow2");
        tokio::fs::write(&pool, b"data").await.unwrap();
        let cache = dir.path().join("cache").join("img.qcow2");

        let transfer = SymlinkTransfer::new();
        transfer.download(&cache, &pool).await.unwrap();

        let target = tokio::fs::read_link(&cache).await.unwrap();
        assert_eq!(target, pool);
    }

    #[tokio::test]
    async fn download_refuses_to_overwrite_non_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let pool = dir.path().join("pool.qcow2");
        let cache = dir.path().join("cache.qcow2");
        tokio::fs::write(&pool, b"data").await.unwrap();
        tokio::fs::write(&cache, b"other").await.unwrap();

        let transfer = SymlinkTransfer::new();
        let result = transfer.download(&cache, &pool).await;
        assert!(matches!(result, Err(Error::InvalidLocation { .. })));
    }

    #[tokio::test]
    async fn upload_from_symlink_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = SymlinkTransfer::new();
        let result = transfer
            .upload(&dir.path().join("cache"), &dir.path().join("pool"))
            .await;
        assert!(matches!(result, Err(Error::InvalidLocation { .. })));
    }
}
