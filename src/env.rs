//! The VM runtime capability set (§6 "Env handle") that concrete backends
//! drive but never own: the core treats it as an opaque external collaborator.

use crate::error::{Error, Result};
use async_trait::async_trait;

/// The capability set a VM runtime object exposes to the core.
#[async_trait]
pub trait VmHandle: Send + Sync {
    fn name(&self) -> &str;
    async fn is_alive(&self) -> Result<bool>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn create(&self) -> Result<()>;
    async fn destroy(&self, graceful: bool) -> Result<()>;
    async fn save_to_file(&self, path: &str) -> Result<()>;
    async fn restore_from_file(&self, path: &str) -> Result<()>;
    async fn monitor_send(&self, cmd: &str) -> Result<String>;
    async fn savevm(&self, name: &str) -> Result<()>;
    async fn loadvm(&self, name: &str) -> Result<()>;
    async fn delvm(&self, name: &str) -> Result<()>;
    async fn verify_status(&self, status: &str) -> Result<bool>;
}

/// Raised when a backend calls a capability the handle does not support;
/// treated as `ErrBackend` per §6.
pub fn unsupported(object: &str, capability: &str) -> Error {
    Error::Backend {
        backend: "env".to_string(),
        object: object.to_string(),
        operation: capability.to_string(),
        reason: "capability not supported by this runtime object".to_string(),
    }
}

/// Environment handle: resolves a vm name to its runtime object.
#[async_trait]
pub trait Env: Send + Sync {
    async fn get_vm(&self, name: &str) -> Result<Option<std::sync::Arc<dyn VmHandle>>>;
}
