//! QCOW2-VT backend: VM-runtime snapshots taken through the monitor's
//! `savevm`/`loadvm`/`delvm` commands. Requires the VM to be online for
//! every state-mutating verb.

use super::StateBackend;
use crate::env::VmHandle;
use crate::error::{Error, Result};
use crate::params::Params;
use async_trait::async_trait;
use tracing::instrument;

pub struct Qcow2Vt;

impl Qcow2Vt {
    pub fn new() -> Self {
        Self
    }

    fn vm<'a>(&self, object: &str, vm: Option<&'a dyn VmHandle>) -> Result<&'a dyn VmHandle> {
        vm.ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "qcow2vt".to_string(),
            precondition: "a live VM runtime handle".to_string(),
        })
    }
}

impl Default for Qcow2Vt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for Qcow2Vt {
    fn requires_running_object(&self) -> bool {
        true
    }

    async fn show(&self, _params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<Vec<String>> {
        let vm = self.vm(object, vm)?;
        let reply = vm.monitor_send("info snapshots").await?;
        Ok(reply
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                let mut fields = line.split_whitespace();
                let first = fields.next()?;
                if first.chars().all(|c| c.is_ascii_digit()) {
                    fields.next().map(str::to_string)
                } else {
                    None
                }
            })
            .collect())
    }

    async fn check(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        let state = params.get_or("check_state", object, "");
        Ok(self.show(params, object, vm).await?.contains(&state))
    }

    #[instrument(skip(self, params, vm))]
    async fn get(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        let vm = self.vm(object, vm)?;
        let state = params.get("get_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "get".to_string(),
            precondition: "get_state parameter".to_string(),
        })?;
        vm.loadvm(state).await
    }

    #[instrument(skip(self, params, vm))]
    async fn set(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        let vm = self.vm(object, vm)?;
        let state = params.get("set_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "set".to_string(),
            precondition: "set_state parameter".to_string(),
        })?;
        vm.savevm(state).await
    }

    async fn unset(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        let vm = self.vm(object, vm)?;
        let state = params.get("unset_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "unset".to_string(),
            precondition: "unset_state parameter".to_string(),
        })?;
        vm.delvm(state).await
    }

    async fn check_root(&self, _params: &Params, _object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        match vm {
            Some(vm) => vm.is_alive().await,
            None => Ok(false),
        }
    }

    async fn set_root(&self, _params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        self.vm(object, vm)?.create().await
    }

    async fn unset_root(&self, _params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        self.vm(object, vm)?.destroy(true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_names_from_monitor_reply() {
        let reply = "List of snapshots present on all disks:\n\
                      ID        TAG                 VM SIZE                DATE       VM CLOCK\n\
                      1         launch                 124M 2024-01-01 12:00:00   00:00:00.000\n";
        let tags: Vec<String> = reply
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                let mut fields = line.split_whitespace();
                let first = fields.next()?;
                if first.chars().all(|c| c.is_ascii_digit()) {
                    fields.next().map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        assert_eq!(tags, vec!["launch".to_string()]);
    }
}
