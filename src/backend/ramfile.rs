//! RAM-file backend: VM memory state captured via the runtime's
//! save/restore-to-file capability, complete only when every image of the
//! VM also has the matching image state.

use super::StateBackend;
use crate::backend::Registry;
use crate::env::{unsupported, VmHandle};
use crate::error::{Error, Result};
use crate::params::Params;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

pub struct RamFileBackend {
    images: Arc<Registry>,
}

impl RamFileBackend {
    pub fn new() -> Self {
        Self {
            images: Arc::new(Registry::image_backends()),
        }
    }

    pub fn with_image_backends(images: Arc<Registry>) -> Self {
        Self { images }
    }

    fn state_path(&self, params: &Params, object: &str, state: &str) -> PathBuf {
        let pool = params.get_or("swarm_pool", object, "/tmp/vmstate");
        let vm_name = object.split('/').next_back().unwrap_or(object);
        PathBuf::from(pool).join(vm_name).join(format!("{state}.state"))
    }

    fn vm_handle<'a>(&self, object: &str, vm: Option<&'a dyn VmHandle>) -> Result<&'a dyn VmHandle> {
        vm.ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "ramfile".to_string(),
            precondition: "a live VM runtime handle".to_string(),
        })
    }

    /// A ram state is complete only when every image of this vm reports the
    /// same state name through its configured backend.
    async fn image_states_complete(&self, params: &Params, object: &str, state: &str) -> Result<bool> {
        let images = params.objects_scoped("images", object);
        if images.is_empty() {
            return Ok(true);
        }
        for image in &images {
            let image_object = format!("{object}/{image}");
            let backend = self
                .images
                .resolve(params, "images", &image_object)
                .ok_or_else(|| Error::Precondition {
                    object: image_object.clone(),
                    operation: "ramfile completeness check".to_string(),
                    precondition: "states_images backend selector".to_string(),
                })?;
            if !backend.show(params, &image_object, None).await?.contains(&state.to_string()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Default for RamFileBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for RamFileBackend {
    fn requires_running_object(&self) -> bool {
        true
    }

    async fn show(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<Vec<String>> {
        let vm_name = object.split('/').next_back().unwrap_or(object);
        let dir = PathBuf::from(params.get_or("swarm_pool", object, "/tmp/vmstate")).join(vm_name);
        let mut candidates = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
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
            if let Some(state) = name.strip_suffix(".state") {
                candidates.push(state.to_string());
            }
        }
        let mut complete = Vec::new();
        for state in candidates {
            if self.image_states_complete(params, object, &state).await? {
                complete.push(state);
            }
        }
        Ok(complete)
    }

    async fn check(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        let state = params.get_or("check_state", object, "");
        Ok(self.show(params, object, vm).await?.contains(&state))
    }

    /// Pauses the VM, restores every image via its configured backend, then
    /// restores the RAM file and resumes.
    #[instrument(skip(self, params, vm))]
    async fn get(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        let vm = self.vm_handle(object, vm)?;
        let state = params.get("get_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "get".to_string(),
            precondition: "get_state parameter".to_string(),
        })?;
        let path = self.state_path(params, object, state);

        vm.pause().await?;
        for image in params.objects_scoped("images", object) {
            let image_object = format!("{object}/{image}");
            let backend = self
                .images
                .resolve(params, "images", &image_object)
                .ok_or_else(|| unsupported(&image_object, "states_images backend selector"))?;
            let narrowed = params.with_override(&format!("get_state_{image}"), state);
            backend.get(&narrowed, &image_object, None).await?;
        }
        vm.restore_from_file(&path.display().to_string()).await?;
        vm.resume().await?;
        Ok(())
    }

    /// Pauses, saves RAM, destroys the VM, sets each image state, then
    /// resumes by restoring the just-saved file (the only clean way to
    /// recover the VM after the destroy step).
    #[instrument(skip(self, params, vm))]
    async fn set(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        let vm = self.vm_handle(object, vm)?;
        let state = params.get("set_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "set".to_string(),
            precondition: "set_state parameter".to_string(),
        })?;
        let path = self.state_path(params, object, state);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Transport {
                    operation: "create ram state dir".to_string(),
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        vm.pause().await?;
        vm.save_to_file(&path.display().to_string()).await?;
        vm.destroy(true).await?;
        for image in params.objects_scoped("images", object) {
            let image_object = format!("{object}/{image}");
            let backend = self
                .images
                .resolve(params, "images", &image_object)
                .ok_or_else(|| unsupported(&image_object, "states_images backend selector"))?;
            let narrowed = params.with_override(&format!("set_state_{image}"), state);
            backend.set(&narrowed, &image_object, None).await?;
        }
        vm.restore_from_file(&path.display().to_string()).await?;
        vm.resume().await?;
        Ok(())
    }

    async fn unset(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let state = params.get("unset_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "unset".to_string(),
            precondition: "unset_state parameter".to_string(),
        })?;
        let path = self.state_path(params, object, state);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Transport {
                operation: "unset".to_string(),
                path: path.display().to_string(),
                source,
            }),
        }
    }

    async fn check_root(&self, _params: &Params, _object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        match vm {
            Some(vm) => vm.is_alive().await,
            None => Ok(false),
        }
    }

    async fn set_root(&self, _params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        self.vm_handle(object, vm)?.create().await
    }

    async fn unset_root(&self, _params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        self.vm_handle(object, vm)?.destroy(true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_path_uses_vm_leaf_name() {
        let backend = RamFileBackend::new();
        let mut data = std::collections::HashMap::new();
        data.insert("swarm_pool".to_string(), "/images".to_string());
        let params = Params::new(data);
        let path = backend.state_path(&params, "net1/vm1", "launch");
        assert_eq!(path, PathBuf::from("/images/vm1/launch.state"));
    }
}
