//! E1: a qcow2-external image backend reports `check` by the presence of a
//! `<state>.qcow2` file in its per-image directory.

use std::collections::HashMap;
use vmstate_core::backend::qcow2_external::Qcow2External;
use vmstate_core::backend::StateBackend;
use vmstate_core::params::Params;

fn params_for(dir: &std::path::Path) -> Params {
    let mut data = HashMap::new();
    data.insert("swarm_pool".to_string(), dir.display().to_string());
    data.insert("image_name".to_string(), "vm1/image1".to_string());
    data.insert("check_state".to_string(), "launch".to_string());
    Params::new(data)
}

#[tokio::test]
async fn check_true_when_state_file_present() {
    let dir = tempfile::tempdir().unwrap();
    let image_dir = dir.path().join("vm1/image1");
    tokio::fs::create_dir_all(&image_dir).await.unwrap();
    tokio::fs::write(image_dir.join("launch.qcow2"), b"").await.unwrap();

    let backend = Qcow2External::new();
    let params = params_for(dir.path());
    assert!(backend.check(&params, "vm1/image1", None).await.unwrap());
}

#[tokio::test]
async fn check_false_when_state_file_absent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Qcow2External::new();
    let params = params_for(dir.path());
    assert!(!backend.check(&params, "vm1/image1", None).await.unwrap());
}
