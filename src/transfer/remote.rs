//! Remote (SSH) transfer implementation.
//!
//! Remote locking is intentionally **not** implemented (§4.1): pool writes
//! over this transport are unsynchronised, matching the original's
//! documented gap rather than silently adding coherence it never promised.

use super::{SessionCache, TransferOps};
use crate::error::{Error, Result};
use crate::transfer::session::SshParams;
use async_trait::async_trait;
use std::path::Path;
use tracing::instrument;

pub struct RemoteTransfer {
    sessions: SessionCache,
    host: String,
    params: SshParams,
}

impl RemoteTransfer {
    pub fn new(sessions: SessionCache, host: String) -> Self {
        Self {
            sessions,
            host,
            params: SshParams::default(),
        }
    }

    pub fn with_ssh_params(mut self, params: SshParams) -> Self {
        self.params = params;
        self
    }

    async fn run(&self, shell_cmd: &str) -> Result<(i32, String)> {
        let session = self.sessions.get(&self.host, &self.params).await?;
        let output = session
            .command("sh")
            .arg("-c")
            .arg(shell_cmd)
            .output()
            .await
            .map_err(|e| Error::SshTransport {
                host: self.host.clone(),
                reason: e.to_string(),
            })?;
        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        Ok((code, stdout))
    }
}

fn shell_escape(cmd: &str) -> String {
    format!("'{}'", cmd.replace('\'', "'\\''"))
}

#[async_trait]
impl TransferOps for RemoteTransfer {
    #[instrument(skip(self))]
    async fn list(&self, path: &Path) -> Result<Vec<String>> {
        let (_, stdout) = self.run(&format!("ls -1 {} 2>/dev/null", path.display())).await?;
        Ok(stdout.lines().map(str::to_string).collect())
    }

    #[instrument(skip(self))]
    async fn compare(&self, cache: &Path, pool: &Path) -> Result<bool> {
        let local_hash = super::hash_file(cache).await?;
        let (code, stdout) = self
            .run(&format!(
                "md5sum {} 2>/dev/null | cut -d' ' -f1",
                pool.display()
            ))
            .await?;
        let remote_hash = if code == 0 { stdout.trim().to_string() } else { String::new() };
        Ok(local_hash == remote_hash)
    }

    /// Copies via a base64-encoded heredoc over `sh -c`, the same
    /// binary-safe transfer the original tool uses instead of depending on
    /// a separate SFTP subsystem being enabled on the remote end.
    #[instrument(skip(self))]
    async fn download(&self, cache: &Path, pool: &Path) -> Result<()> {
        if self.compare(cache, pool).await.unwrap_or(false) {
            return Ok(());
        }
        if let Some(parent) = cache.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Transport {
                    operation: "create cache dir".to_string(),
                    path: parent.display().to_string(),
                    source,
                })?;
        }
        let (code, stdout) = self
            .run(&format!("base64 {} 2>/dev/null", pool.display()))
            .await?;
        if code != 0 {
            return Err(Error::SshTransport {
                host: self.host.clone(),
                reason: format!("remote base64 read exited with code {code}"),
            });
        }
        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD
            .decode(stdout.replace('\n', ""))
            .map_err(|e| Error::SshTransport {
                host: self.host.clone(),
                reason: format!("decoding remote base64 payload: {e}"),
            })?;
        tokio::fs::write(cache, data)
            .await
            .map_err(|source| Error::Transport {
                operation: "write downloaded file".to_string(),
                path: cache.display().to_string(),
                source,
            })
    }

    #[instrument(skip(self))]
    async fn upload(&self, cache: &Path, pool: &Path) -> Result<()> {
        let data = tokio::fs::read(cache)
            .await
            .map_err(|source| Error::Transport {
                operation: "read local file for upload".to_string(),
                path: cache.display().to_string(),
                source,
            })?;
        if let Some(parent) = pool.parent() {
            let _ = self.run(&format!("mkdir -p {}", parent.display())).await;
        }
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        let (code, _) = self
            .run(&format!(
                "echo {} | base64 -d > {}",
                shell_escape(&encoded),
                pool.display()
            ))
            .await?;
        if code != 0 {
            return Err(Error::SshTransport {
                host: self.host.clone(),
                reason: format!("remote base64 write exited with code {code}"),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, pool: &Path) -> Result<()> {
        let (code, _) = self.run(&format!("rm -f {}", pool.display())).await?;
        if code != 0 {
            return Err(Error::SshTransport {
                host: self.host.clone(),
                reason: format!("remote rm exited with code {code}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_single_quotes() {
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }
}
