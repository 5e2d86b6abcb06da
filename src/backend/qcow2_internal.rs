//! QCOW2-internal backend: named snapshots stored inside a single QCOW2 file.

use super::StateBackend;
use crate::env::VmHandle;
use crate::error::{Error, Result};
use crate::params::Params;
use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;
use tracing::instrument;

/// Matches a `qemu-img snapshot -l` table row: `ID  TAG  VM SIZE  DATE  VM CLOCK`.
/// An "off" snapshot (image-only, no live VM state) reports a VM SIZE of `0`.
fn row_regex() -> Regex {
    Regex::new(r"^\d+\s+(?P<tag>\S+)\s+(?P<size>\d+(?:\.?\d*\s*[KMGT]?i?B)?|0)\s").unwrap()
}

pub struct Qcow2Internal;

impl Qcow2Internal {
    pub fn new() -> Self {
        Self
    }

    fn image_path(&self, params: &Params, object: &str) -> Result<String> {
        params
            .get("image_name", object)
            .map(str::to_string)
            .ok_or_else(|| Error::Precondition {
                object: object.to_string(),
                operation: "qcow2int".to_string(),
                precondition: "image_name parameter".to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn snapshot_list(&self, image: &str) -> Result<Vec<(String, bool)>> {
        let output = Command::new("qemu-img")
            .arg("snapshot")
            .arg("-l")
            .arg(image)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| Error::CommandSpawn {
                command: "qemu-img snapshot -l".to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: "qemu-img snapshot -l".to_string(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let re = row_regex();
        let mut snapshots = Vec::new();
        for line in text.lines() {
            if let Some(caps) = re.captures(line) {
                let tag = caps["tag"].to_string();
                let size = &caps["size"];
                let off = size == "0" || size.starts_with("0 ");
                snapshots.push((tag, !off));
            }
        }
        Ok(snapshots)
    }

    async fn run_qemu_img(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("qemu-img")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| Error::CommandSpawn {
                command: format!("qemu-img {}", args.join(" ")),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: format!("qemu-img {}", args.join(" ")),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Qcow2Internal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for Qcow2Internal {
    fn requires_running_object(&self) -> bool {
        false
    }

    async fn show(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<Vec<String>> {
        let image = self.image_path(params, object)?;
        Ok(self
            .snapshot_list(&image)
            .await?
            .into_iter()
            .map(|(tag, _)| tag)
            .collect())
    }

    async fn check(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        let state = params.get_or("check_state", object, "");
        Ok(self.show(params, object, vm).await?.contains(&state))
    }

    async fn get(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let image = self.image_path(params, object)?;
        let state = params.get("get_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "get".to_string(),
            precondition: "get_state parameter".to_string(),
        })?;
        self.run_qemu_img(&["snapshot", "-a", state, &image]).await
    }

    async fn set(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let image = self.image_path(params, object)?;
        let state = params.get("set_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "set".to_string(),
            precondition: "set_state parameter".to_string(),
        })?;
        self.run_qemu_img(&["snapshot", "-c", state, &image]).await
    }

    async fn unset(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let image = self.image_path(params, object)?;
        let state = params.get("unset_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "unset".to_string(),
            precondition: "unset_state parameter".to_string(),
        })?;
        self.run_qemu_img(&["snapshot", "-d", state, &image]).await
    }

    async fn check_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<bool> {
        let image = self.image_path(params, object)?;
        Ok(tokio::fs::metadata(&image).await.is_ok())
    }

    async fn set_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let image = self.image_path(params, object)?;
        let format = params.get_or("image_format", object, "qcow2");
        let size = params.get_or("image_size", object, "10G");
        self.run_qemu_img(&["create", "-f", &format, &image, &size]).await
    }

    async fn unset_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let image = self.image_path(params, object)?;
        match tokio::fs::remove_file(&image).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Transport {
                operation: "unset_root".to_string(),
                path: image,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_table() {
        let table = "ID        TAG                 VM SIZE                DATE       VM CLOCK\n\
                      1         launch                    0 2024-01-01 12:00:00   00:00:00.000\n\
                      2         running               512 MiB 2024-01-02 12:00:00   00:10:00.000\n";
        let re = row_regex();
        let mut tags_with_state = Vec::new();
        for line in table.lines() {
            if let Some(caps) = re.captures(line) {
                tags_with_state.push((caps["tag"].to_string(), caps["size"].to_string()));
            }
        }
        assert_eq!(tags_with_state[0], ("launch".to_string(), "0".to_string()));
        assert_eq!(
            tags_with_state[1],
            ("running".to_string(), "512 MiB".to_string())
        );
    }
}
