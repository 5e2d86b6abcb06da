//! QCOW2-external backend: one `<state>.qcow2` file per state inside a
//! per-image directory, each carrying an explicit backing-file pointer.

use super::StateBackend;
use crate::env::VmHandle;
use crate::error::{Error, Result};
use crate::params::Params;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::instrument;

pub struct Qcow2External;

impl Qcow2External {
    pub fn new() -> Self {
        Self
    }

    fn image_dir(&self, params: &Params, object: &str) -> PathBuf {
        let pool = params.get_or("swarm_pool", object, "/tmp/vmstate");
        let image_name = params.get_or("image_name", object, object);
        Path::new(&pool).join(&image_name)
    }

    fn working_image(&self, params: &Params, object: &str) -> PathBuf {
        let pool = params.get_or("swarm_pool", object, "/tmp/vmstate");
        let image_name = params.get_or("image_name", object, object);
        Path::new(&pool).join(format!("{image_name}.qcow2"))
    }

    #[instrument(skip(self))]
    async fn create_with_backing(&self, new_path: &Path, backing: &Path, format: &str) -> Result<()> {
        if let Some(parent) = new_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Transport {
                    operation: "create image dir".to_string(),
                    path: parent.display().to_string(),
                    source,
                })?;
        }
        let output = Command::new("qemu-img")
            .arg("create")
            .arg("-f")
            .arg(format)
            .arg("-b")
            .arg(backing)
            .arg("-F")
            .arg(format)
            .arg(new_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| Error::CommandSpawn {
                command: "qemu-img create".to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: "qemu-img create".to_string(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Qcow2External {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for Qcow2External {
    fn requires_running_object(&self) -> bool {
        false
    }

    async fn show(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<Vec<String>> {
        let dir = self.image_dir(params, object);
        let mut names = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(source) => {
                return Err(Error::Transport {
                    operation: "show".to_string(),
                    path: dir.display().to_string(),
                    source,
                })
            }
        };
        while let Some(entry) = read_dir.next_entry().await.map_err(|source| Error::Transport {
            operation: "show".to_string(),
            path: dir.display().to_string(),
            source,
        })? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(state) = name.strip_suffix(".qcow2") {
                names.push(state.to_string());
            }
        }
        Ok(names)
    }

    async fn check(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        let state = params.get_or("check_state", object, "");
        Ok(self.show(params, object, vm).await?.contains(&state))
    }

    async fn get(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let dir = self.image_dir(params, object);
        let state = params.get("get_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "get".to_string(),
            precondition: "get_state parameter".to_string(),
        })?;
        let format = params.get_or("image_format", object, "qcow2");
        let backing = dir.join(format!("{state}.qcow2"));
        let working = self.working_image(params, object);
        if working.exists() {
            tokio::fs::remove_file(&working).await.ok();
        }
        self.create_with_backing(&working, &backing, &format).await
    }

    async fn set(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let dir = self.image_dir(params, object);
        let state = params.get("set_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "set".to_string(),
            precondition: "set_state parameter".to_string(),
        })?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| Error::Transport {
                operation: "set".to_string(),
                path: dir.display().to_string(),
                source,
            })?;
        let working = self.working_image(params, object);
        let target = dir.join(format!("{state}.qcow2"));
        tokio::fs::copy(&working, &target)
            .await
            .map_err(|source| Error::Transport {
                operation: "copy working image into state".to_string(),
                path: target.display().to_string(),
                source,
            })?;
        Ok(())
    }

    async fn unset(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let dir = self.image_dir(params, object);
        let state = params.get("unset_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "unset".to_string(),
            precondition: "unset_state parameter".to_string(),
        })?;
        let target = dir.join(format!("{state}.qcow2"));
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Transport {
                operation: "unset".to_string(),
                path: target.display().to_string(),
                source,
            }),
        }
    }

    async fn check_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<bool> {
        Ok(self.working_image(params, object).exists())
    }

    async fn set_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let working = self.working_image(params, object);
        let format = params.get_or("image_format", object, "qcow2");
        let size = params.get_or("image_size", object, "10G");
        if let Some(parent) = working.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let output = Command::new("qemu-img")
            .args(["create", "-f", &format])
            .arg(&working)
            .arg(&size)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| Error::CommandSpawn {
                command: "qemu-img create".to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: "qemu-img create".to_string(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn unset_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let working = self.working_image(params, object);
        match tokio::fs::remove_file(&working).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Transport {
                operation: "unset_root".to_string(),
                path: working.display().to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn show_lists_qcow2_files() {
        let dir = tempfile::tempdir().unwrap();
        let image_dir = dir.path().join("vm1").join("image1");
        tokio::fs::create_dir_all(&image_dir).await.unwrap();
        tokio::fs::write(image_dir.join("launch.qcow2"), b"").await.unwrap();
        tokio::fs::write(image_dir.join("stray.txt"), b"").await.unwrap();

        let mut data = HashMap::new();
        data.insert("swarm_pool".to_string(), dir.path().join("vm1").display().to_string());
        data.insert("image_name".to_string(), "image1".to_string());
        let params = Params::new(data);

        let backend = Qcow2External::new();
        let states = backend.show(&params, "vm1/image1", None).await.unwrap();
        assert_eq!(states, vec!["launch".to_string()]);
    }
}
