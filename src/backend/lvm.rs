//! LVM backend: thin LV snapshots inside a per-object volume group, with a
//! single mutable "pointer" LV standing in for the live working copy.

use super::StateBackend;
use crate::env::VmHandle;
use crate::error::{Error, Result};
use crate::params::Params;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{instrument, warn};

/// Runs an LVM CLI subcommand, mapping a nonzero exit to [`Error::CommandFailed`].
#[instrument]
async fn run(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| Error::CommandSpawn {
            command: format!("{cmd} {}", args.join(" ")),
            source,
        })?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: format!("{cmd} {}", args.join(" ")),
            error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[derive(Debug, Deserialize)]
struct LvReport {
    report: Vec<LvReportEntry>,
}

#[derive(Debug, Deserialize)]
struct LvReportEntry {
    lv: Vec<LvEntry>,
}

#[derive(Debug, Deserialize)]
struct LvEntry {
    lv_name: String,
}

async fn list_lvs(vg: &str) -> Result<Vec<String>> {
    let out = run(
        "lvs",
        &[vg, "--options=lv_name", "--reportformat", "json", "--noheadings"],
    )
    .await?;
    let report: LvReport = serde_json::from_str(&out).map_err(|error| Error::JsonParsing {
        command: "lvs".to_string(),
        error: error.to_string(),
    })?;
    Ok(report
        .report
        .into_iter()
        .flat_map(|r| r.lv)
        .map(|lv| lv.lv_name)
        .collect())
}

pub struct LvmBackend;

impl LvmBackend {
    pub fn new() -> Self {
        Self
    }

    fn vg_name(&self, params: &Params, object: &str) -> String {
        params.get_or("vg_name", object, &object.replace('/', "_"))
    }

    fn pointer_name(&self, params: &Params, object: &str) -> String {
        params.get_or("lv_pointer_name", object, "current_state")
    }

    async fn snapshot(&self, vg: &str, source: &str, target: &str) -> Result<()> {
        let source_path = format!("{vg}/{source}");
        run(
            "lvcreate",
            &["--snapshot", "--name", target, &source_path],
        )
        .await?;
        Ok(())
    }

    async fn remove_lv(&self, vg: &str, name: &str) -> Result<()> {
        let path = format!("{vg}/{name}");
        run("lvremove", &["--yes", &path]).await?;
        Ok(())
    }
}

impl Default for LvmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LvmBackend {
    fn requires_running_object(&self) -> bool {
        false
    }

    async fn show(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<Vec<String>> {
        let vg = self.vg_name(params, object);
        let pointer = self.pointer_name(params, object);
        Ok(list_lvs(&vg).await?.into_iter().filter(|lv| lv != &pointer).collect())
    }

    async fn check(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        let state = params.get_or("check_state", object, "");
        Ok(self.show(params, object, vm).await?.contains(&state))
    }

    /// Removes the pointer LV and re-snapshots the requested state into it.
    async fn get(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let vg = self.vg_name(params, object);
        let pointer = self.pointer_name(params, object);
        let state = params.get("get_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "get".to_string(),
            precondition: "get_state parameter".to_string(),
        })?;
        if list_lvs(&vg).await?.iter().any(|lv| lv == &pointer) {
            self.remove_lv(&vg, &pointer).await?;
        }
        self.snapshot(&vg, state, &pointer).await
    }

    /// Snapshots the pointer LV back into the target state name.
    async fn set(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let vg = self.vg_name(params, object);
        let pointer = self.pointer_name(params, object);
        let state = params.get("set_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "set".to_string(),
            precondition: "set_state parameter".to_string(),
        })?;
        self.snapshot(&vg, &pointer, state).await
    }

    async fn unset(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let vg = self.vg_name(params, object);
        let pointer = self.pointer_name(params, object);
        let state = params.get("unset_state", object).ok_or_else(|| Error::Precondition {
            object: object.to_string(),
            operation: "unset".to_string(),
            precondition: "unset_state parameter".to_string(),
        })?;
        if state == pointer {
            return Err(Error::InvalidPointerUnset { state: state.to_string() });
        }
        self.remove_lv(&vg, state).await
    }

    async fn check_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<bool> {
        let vg = self.vg_name(params, object);
        let pointer = self.pointer_name(params, object);
        Ok(list_lvs(&vg).await.unwrap_or_default().iter().any(|lv| lv == &pointer))
    }

    /// Builds a loopback-backed volume group with a thin pool, then a
    /// pointer LV inside it.
    #[instrument(skip(self, params, _vm))]
    async fn set_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let vg = self.vg_name(params, object);
        let pointer = self.pointer_name(params, object);
        let backing_file = params.get_or("lv_backing_file", object, &format!("/var/lib/vmstate/{vg}.img"));
        let size = params.get_or("image_size", object, "10G");
        let pool_name = params.get_or("lv_pool_name", object, "thinpool");

        if let Some(parent) = std::path::Path::new(&backing_file).parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        run("truncate", &["--size", &size, &backing_file]).await?;
        let loop_dev = run("losetup", &["--find", "--show", &backing_file])
            .await?
            .trim()
            .to_string();
        run("pvcreate", &["--yes", &loop_dev]).await?;
        run("vgcreate", &[&vg, &loop_dev]).await?;
        run(
            "lvcreate",
            &["--type", "thin-pool", "--name", &pool_name, "--extents", "100%FREE", &vg],
        )
        .await?;
        let thin_path = format!("{vg}/{pool_name}");
        run(
            "lvcreate",
            &[
                "--thin",
                "--name",
                &pointer,
                "--virtualsize",
                &size,
                &thin_path,
            ],
        )
        .await?;
        Ok(())
    }

    /// Tears down the volume group, physical volume, and loop device,
    /// tolerating partial failures and aggregating them into one error.
    #[instrument(skip(self, params, _vm))]
    async fn unset_root(&self, params: &Params, object: &str, _vm: Option<&dyn VmHandle>) -> Result<()> {
        let vg = self.vg_name(params, object);
        let backing_file = params.get_or("lv_backing_file", object, &format!("/var/lib/vmstate/{vg}.img"));
        let mut failures = Vec::new();

        if let Err(e) = run("vgremove", &["--yes", "--force", &vg]).await {
            failures.push(format!("vgremove: {e}"));
        }

        let loop_dev = match run("losetup", &["--associated", &backing_file, "--noheadings", "--output", "NAME"]).await {
            Ok(out) => out.lines().next().map(str::trim).map(str::to_string),
            Err(e) => {
                failures.push(format!("losetup lookup: {e}"));
                None
            }
        };
        if let Some(loop_dev) = loop_dev {
            if let Err(e) = run("losetup", &["--detach", &loop_dev]).await {
                failures.push(format!("losetup detach: {e}"));
            }
        }

        if let Err(e) = tokio::fs::remove_file(&backing_file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                failures.push(format!("remove backing file: {e}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            for failure in &failures {
                warn!(vg = %vg, %failure, "vg cleanup stage failed, continuing");
            }
            Err(Error::Backend {
                backend: "lvm".to_string(),
                object: object.to_string(),
                operation: "unset_root".to_string(),
                reason: failures.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pointer_cannot_be_unset_by_name() {
        let mut data = std::collections::HashMap::new();
        data.insert("lv_pointer_name".to_string(), "current_state".to_string());
        data.insert("unset_state".to_string(), "current_state".to_string());
        let params = Params::new(data);

        let err = LvmBackend::new().unset(&params, "vm1/image1", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPointerUnset { .. }));
    }

    #[test]
    fn parses_lv_report_json() {
        let json = r#"{"report":[{"lv":[{"lv_name":"launch"},{"lv_name":"current_state"}]}]}"#;
        let report: LvReport = serde_json::from_str(json).unwrap();
        let names: Vec<_> = report.report.into_iter().flat_map(|r| r.lv).map(|lv| lv.lv_name).collect();
        assert_eq!(names, vec!["launch".to_string(), "current_state".to_string()]);
    }
}
