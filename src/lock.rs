//! Advisory file locking for pool artefacts.
//!
//! Mirrors the original's `image_lock`: an exclusive lock on `<path>.lock`,
//! acquired with a 1-second poll loop up to a configurable timeout. The
//! "skip all locking" escape hatch is a constructor parameter on
//! [`LockManager`] rather than a module-level global, per the design note
//! that flags a global flag as dangerous state.

use crate::error::{Error, Result};
use nix::fcntl::{flock, FlockArg};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::time::sleep;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Issues advisory locks, honouring a process-wide skip-locks switch.
#[derive(Clone, Copy, Debug)]
pub struct LockManager {
    skip_locks: bool,
}

impl LockManager {
    pub fn new(skip_locks: bool) -> Self {
        Self { skip_locks }
    }

    /// Acquires an exclusive lock on `<path>.lock`, polling every second up
    /// to `timeout`, then runs `body` and always releases the lock
    /// afterwards (success or failure).
    pub async fn with_lock<F, Fut, T>(&self, path: &Path, timeout: Duration, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if self.skip_locks {
            return body().await;
        }
        let guard = self.acquire(path, timeout).await?;
        let result = body().await;
        drop(guard);
        result
    }

    async fn acquire(&self, path: &Path, timeout: Duration) -> Result<LockGuard> {
        let lock_path = lock_path_for(path);
        if let Some(parent) = lock_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&lock_path)
            .await
            .map_err(|source| Error::Transport {
                operation: "open lock file".to_string(),
                path: lock_path.display().to_string(),
                source,
            })?;

        let started = Instant::now();
        loop {
            let fd = file.as_raw_fd();
            match flock(fd, FlockArg::LockExclusiveNonblock) {
                Ok(()) => {
                    return Ok(LockGuard { file, path: lock_path });
                }
                Err(nix::errno::Errno::EWOULDBLOCK) | Err(nix::errno::Errno::EAGAIN) => {
                    if started.elapsed() >= timeout {
                        return Err(Error::LockTimeout {
                            path: lock_path.display().to_string(),
                            elapsed: started.elapsed(),
                        });
                    }
                    sleep(POLL_INTERVAL).await;
                }
                Err(errno) => {
                    return Err(Error::Transport {
                        operation: "acquire lock".to_string(),
                        path: lock_path.display().to_string(),
                        source: std::io::Error::from_raw_os_error(errno as i32),
                    });
                }
            }
        }
    }
}

struct LockGuard {
    file: tokio::fs::File,
    #[allow(dead_code)]
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".lock");
    PathBuf::from(s)
}
