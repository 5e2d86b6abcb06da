//! E6: pushing a reserved state name (`root`, `boot`) is a silent no-op —
//! no backend call is ever dispatched.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use vmstate_core::backend::Registry;
use vmstate_core::chain::QemuImgProbe;
use vmstate_core::env::{Env, VmHandle};
use vmstate_core::error::Result;
use vmstate_core::orchestrator::Orchestrator;
use vmstate_core::params::Params;
use vmstate_core::sourced::SourcedBackend;
use vmstate_core::transfer::Dispatcher;

struct NoEnv;

#[async_trait]
impl Env for NoEnv {
    async fn get_vm(&self, _name: &str) -> Result<Option<Arc<dyn VmHandle>>> {
        Ok(None)
    }
}

fn orchestrator() -> Orchestrator {
    let registry = Arc::new(Registry::new());
    let dispatcher = Arc::new(Dispatcher::new(std::time::Duration::from_secs(1), true));
    let probe: Arc<dyn vmstate_core::chain::ImageProbe> = Arc::new(QemuImgProbe);
    Orchestrator::new(
        registry,
        Arc::new(NoEnv),
        Box::new(move |local| SourcedBackend::new(local, dispatcher.clone(), probe.clone())),
    )
}

#[tokio::test]
async fn pushing_a_reserved_state_is_a_noop() {
    let mut data = HashMap::new();
    data.insert("states_chain".to_string(), "vms".to_string());
    data.insert("vms".to_string(), "vm1".to_string());
    data.insert("push_state".to_string(), "root".to_string());
    data.insert("push_mode".to_string(), "ff".to_string());
    // Deliberately no `states_vms` backend selector: if the orchestrator
    // tried to resolve a backend for this push, it would fail here first.
    let params = Params::new(data);

    orchestrator().push(&params).await.unwrap();
}
