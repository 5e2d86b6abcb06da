//! E3: with `pool_scope=own shared` and two shared pool locations, `check`
//! returns the OR of local and pool results when they agree, and raises
//! `ErrInconsistent` when they disagree.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vmstate_core::backend::StateBackend;
use vmstate_core::chain::QemuImgProbe;
use vmstate_core::env::VmHandle;
use vmstate_core::error::{ErrorKind, Result};
use vmstate_core::params::Params;
use vmstate_core::sourced::SourcedBackend;
use vmstate_core::transfer::Dispatcher;

struct AlwaysAbsent;

#[async_trait]
impl StateBackend for AlwaysAbsent {
    async fn show(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn check(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<bool> {
        Ok(false)
    }
    async fn get(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<()> {
        Ok(())
    }
    async fn set(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<()> {
        Ok(())
    }
    async fn unset(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<()> {
        Ok(())
    }
    async fn check_root(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<bool> {
        Ok(false)
    }
    async fn set_root(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<()> {
        Ok(())
    }
    async fn unset_root(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<()> {
        Ok(())
    }
}

fn base_params(dir1: &std::path::Path, dir2: &std::path::Path) -> Params {
    let mut data = HashMap::new();
    data.insert("pool_scope".to_string(), "own shared".to_string());
    data.insert(
        "check_location".to_string(),
        format!(":{} :{}", dir1.display(), dir2.display()),
    );
    data.insert("check_state".to_string(), "launch".to_string());
    data.insert("swarm_pool".to_string(), "/own/does/not/matter".to_string());
    Params::new(data)
}

fn sourced() -> SourcedBackend {
    SourcedBackend::new(
        Arc::new(AlwaysAbsent),
        Arc::new(Dispatcher::new(Duration::from_secs(1), true)),
        Arc::new(QemuImgProbe),
    )
}

#[tokio::test]
async fn agreeing_pools_report_true() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();
    tokio::fs::write(dir1.path().join("launch"), b"").await.unwrap();
    tokio::fs::write(dir2.path().join("launch"), b"").await.unwrap();

    let params = base_params(dir1.path(), dir2.path());
    assert!(sourced().check(&params, "vm1/image1", None).await.unwrap());
}

#[tokio::test]
async fn disagreeing_pools_raise_inconsistent() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();
    tokio::fs::write(dir1.path().join("launch"), b"").await.unwrap();
    // dir2 stays empty: it does not have "launch".

    let params = base_params(dir1.path(), dir2.path());
    let err = sourced().check(&params, "vm1/image1", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Inconsistent);
}
