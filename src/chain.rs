//! Chain resolver (C5): walks QCOW2 backing-file chains for comparison and
//! transfer, behind an injectable probe so tests can substitute a
//! deterministic stub instead of shelling out to `qemu-img`.

use crate::error::{Error, Result};
use crate::transfer::TransferOps;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::instrument;

/// Maximum chain depth; guards against a cyclic or malformed backing chain.
pub const MAX_CHAIN_DEPTH: usize = 64;

/// Reads backing-file metadata for a single image. The production
/// implementation shells out to `qemu-img info --output=json`; tests
/// substitute [`StubProbe`].
#[async_trait]
pub trait ImageProbe: Send + Sync {
    /// Returns the backing filename recorded in `image_path`'s metadata, or
    /// `None` if the image has no backing file.
    async fn backing_file(&self, image_path: &Path) -> Result<Option<String>>;
}

/// `qemu-img info --output=json --force-share <path>` backed probe.
pub struct QemuImgProbe;

#[async_trait]
impl ImageProbe for QemuImgProbe {
    #[instrument(skip(self))]
    async fn backing_file(&self, image_path: &Path) -> Result<Option<String>> {
        let output = Command::new("qemu-img")
            .arg("info")
            .arg("--output=json")
            .arg("--force-share")
            .arg(image_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| Error::CommandSpawn {
                command: "qemu-img info".to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: "qemu-img info".to_string(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let value: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|error| Error::JsonParsing {
                command: "qemu-img info".to_string(),
                error: error.to_string(),
            })?;
        Ok(value
            .get("backing-filename")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }
}

/// Maps a backing filename back to a bare state name: strip directory
/// components and the `.qcow2` extension.
fn state_name_from_backing(backing: &str) -> String {
    let base = Path::new(backing)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| backing.to_string());
    base.strip_suffix(".qcow2").unwrap_or(&base).to_string()
}

/// Walks the backing chain of `state` within `image_dir`, returning
/// `[state, parent, grandparent, ...]`.
pub async fn resolve_chain(
    probe: &dyn ImageProbe,
    image_dir: &Path,
    state: &str,
) -> Result<Vec<String>> {
    let mut chain = vec![state.to_string()];
    let mut current = state.to_string();
    for _ in 0..MAX_CHAIN_DEPTH {
        let image_path = image_dir.join(format!("{current}.qcow2"));
        match probe.backing_file(&image_path).await? {
            Some(backing) if !backing.is_empty() => {
                let parent = state_name_from_backing(&backing);
                chain.push(parent.clone());
                current = parent;
            }
            _ => return Ok(chain),
        }
    }
    Err(Error::ChainTooDeep {
        state: state.to_string(),
        max_depth: MAX_CHAIN_DEPTH,
    })
}

/// `compareChain`: every ancestor's cache copy must hash-match its pool
/// copy; if the chain's top object is a vm-state, the companion RAM file
/// is compared too.
pub async fn compare_chain(
    transfer: &dyn TransferOps,
    probe: &dyn ImageProbe,
    cache_image_dir: &Path,
    pool_image_dir: &Path,
    state: &str,
    is_vm_state: bool,
    cache_ram_file: Option<&Path>,
    pool_ram_file: Option<&Path>,
) -> Result<bool> {
    let chain = resolve_chain(probe, cache_image_dir, state).await?;
    for ancestor in &chain {
        let cache_path = cache_image_dir.join(format!("{ancestor}.qcow2"));
        let pool_path = pool_image_dir.join(format!("{ancestor}.qcow2"));
        if !transfer.compare(&cache_path, &pool_path).await? {
            return Ok(false);
        }
    }
    if is_vm_state {
        if let (Some(cache_ram), Some(pool_ram)) = (cache_ram_file, pool_ram_file) {
            if !transfer.compare(cache_ram, pool_ram).await? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Transfer direction for [`transfer_chain`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Download,
    Upload,
}

/// `transferChain`: downloads or uploads every ancestor, plus the top-level
/// RAM file for vm states. `resolve_chain` returns the chain leaf-first; this
/// walks it in reverse (root-to-leaf) so a transfer interrupted partway
/// through always leaves a backing chain that resolves cleanly from the root
/// down, never a leaf whose backing file never arrived.
pub async fn transfer_chain(
    transfer: &dyn TransferOps,
    probe: &dyn ImageProbe,
    cache_image_dir: &Path,
    pool_image_dir: &Path,
    state: &str,
    direction: Direction,
    is_vm_state: bool,
    cache_ram_file: Option<&Path>,
    pool_ram_file: Option<&Path>,
) -> Result<()> {
    let source_dir = match direction {
        Direction::Download => cache_image_dir,
        Direction::Upload => pool_image_dir,
    };
    let chain = resolve_chain(probe, source_dir, state).await?;
    for ancestor in chain.iter().rev() {
        let cache_path = cache_image_dir.join(format!("{ancestor}.qcow2"));
        let pool_path: PathBuf = pool_image_dir.join(format!("{ancestor}.qcow2"));
        match direction {
            Direction::Download => transfer.download(&cache_path, &pool_path).await?,
            Direction::Upload => transfer.upload(&cache_path, &pool_path).await?,
        }
    }
    if is_vm_state {
        if let (Some(cache_ram), Some(pool_ram)) = (cache_ram_file, pool_ram_file) {
            match direction {
                Direction::Download => transfer.download(cache_ram, pool_ram).await?,
                Direction::Upload => transfer.upload(cache_ram, pool_ram).await?,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub struct StubProbe {
    pub backing: std::collections::HashMap<String, Option<String>>,
}

#[cfg(test)]
#[async_trait]
impl ImageProbe for StubProbe {
    async fn backing_file(&self, image_path: &Path) -> Result<Option<String>> {
        let name = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(self.backing.get(&name).cloned().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn resolves_linear_chain() {
        let mut backing = HashMap::new();
        backing.insert("leaf".to_string(), Some("mid.qcow2".to_string()));
        backing.insert("mid".to_string(), Some("root.qcow2".to_string()));
        backing.insert("root".to_string(), None);
        let probe = StubProbe { backing };
        let chain = resolve_chain(&probe, Path::new("/images"), "leaf")
            .await
            .unwrap();
        assert_eq!(chain, vec!["leaf", "mid", "root"]);
    }

    #[tokio::test]
    async fn cyclic_chain_is_rejected() {
        let mut backing = HashMap::new();
        backing.insert("a".to_string(), Some("b.qcow2".to_string()));
        backing.insert("b".to_string(), Some("a.qcow2".to_string()));
        let probe = StubProbe { backing };
        let result = resolve_chain(&probe, Path::new("/images"), "a").await;
        assert!(matches!(result, Err(Error::ChainTooDeep { .. })));
    }

    #[test]
    fn strips_extension_and_dirname() {
        assert_eq!(state_name_from_backing("/images/vm1/launch.qcow2"), "launch");
        assert_eq!(state_name_from_backing("launch.qcow2"), "launch");
    }
}
