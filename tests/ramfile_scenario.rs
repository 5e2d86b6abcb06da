//! E2: `ramfile.get` pauses the VM, restores every image via its own
//! backend, restores the RAM file, then resumes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vmstate_core::backend::ramfile::RamFileBackend;
use vmstate_core::backend::{Registry, StateBackend};
use vmstate_core::env::VmHandle;
use vmstate_core::error::Result;
use vmstate_core::params::Params;

/// Records the call order observed through the handle so the test can
/// assert pause happens before restore, and resume happens last.
#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<String>>,
}

struct RecordingVm {
    name: String,
    log: Arc<CallLog>,
    pause_count: AtomicUsize,
}

impl RecordingVm {
    fn record(&self, call: &str) {
        self.log.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl VmHandle for RecordingVm {
    fn name(&self) -> &str {
        &self.name
    }
    async fn is_alive(&self) -> Result<bool> {
        Ok(true)
    }
    async fn pause(&self) -> Result<()> {
        self.pause_count.fetch_add(1, Ordering::SeqCst);
        self.record("pause");
        Ok(())
    }
    async fn resume(&self) -> Result<()> {
        self.record("resume");
        Ok(())
    }
    async fn create(&self) -> Result<()> {
        Ok(())
    }
    async fn destroy(&self, _graceful: bool) -> Result<()> {
        Ok(())
    }
    async fn save_to_file(&self, _path: &str) -> Result<()> {
        Ok(())
    }
    async fn restore_from_file(&self, _path: &str) -> Result<()> {
        self.record("restore_from_file");
        Ok(())
    }
    async fn monitor_send(&self, _cmd: &str) -> Result<String> {
        Ok(String::new())
    }
    async fn savevm(&self, _name: &str) -> Result<()> {
        Ok(())
    }
    async fn loadvm(&self, _name: &str) -> Result<()> {
        Ok(())
    }
    async fn delvm(&self, _name: &str) -> Result<()> {
        Ok(())
    }
    async fn verify_status(&self, _status: &str) -> Result<bool> {
        Ok(true)
    }
}

#[tokio::test]
async fn get_restores_images_then_ram_file_between_pause_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let vm_dir = dir.path().join("vm1");
    tokio::fs::create_dir_all(&vm_dir).await.unwrap();
    tokio::fs::write(vm_dir.join("launch.state"), b"").await.unwrap();

    let image_dir = dir.path().join("vm1/image1");
    tokio::fs::create_dir_all(&image_dir).await.unwrap();
    tokio::fs::write(image_dir.join("launch.qcow2"), b"").await.unwrap();

    let images = Arc::new(Registry::image_backends());
    let backend = RamFileBackend::with_image_backends(images);

    let mut data = HashMap::new();
    data.insert("swarm_pool".to_string(), dir.path().display().to_string());
    data.insert("images_vm1".to_string(), "image1".to_string());
    data.insert("states_images".to_string(), "qcow2ext".to_string());
    data.insert("image_name_vm1_image1".to_string(), "vm1/image1".to_string());
    data.insert("get_state".to_string(), "launch".to_string());
    let params = Params::new(data);

    let log = Arc::new(CallLog::default());
    let vm = RecordingVm {
        name: "vm1".to_string(),
        log: log.clone(),
        pause_count: AtomicUsize::new(0),
    };

    backend.get(&params, "vm1", Some(&vm)).await.unwrap();

    let calls = log.calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["pause", "restore_from_file", "resume"]);
}

#[tokio::test]
async fn get_without_vm_handle_is_a_precondition_error() {
    let backend = RamFileBackend::new();
    let params = Params::new(HashMap::new());
    let err = backend.get(&params, "vm1", None).await.unwrap_err();
    assert_eq!(err.kind(), vmstate_core::error::ErrorKind::Precondition);
}
