//! Orchestrator (C8): the top-level `show/check/get/set/unset/push/pop`
//! entry points driving the hierarchy iterator through the policy engine
//! into a sourced backend.

use crate::backend::{is_reserved, Registry};
use crate::env::Env;
use crate::error::{Error, Result};
use crate::hierarchy::{iterate, ObjectView};
use crate::params::Params;
use crate::policy::{Decision, PolicyMode};
use crate::sourced::SourcedBackend;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct Orchestrator {
    registry: Arc<Registry>,
    env: Arc<dyn Env>,
    sourced_factory: Box<dyn Fn(std::sync::Arc<dyn crate::backend::StateBackend>) -> SourcedBackend + Send + Sync>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        env: Arc<dyn Env>,
        sourced_factory: Box<dyn Fn(std::sync::Arc<dyn crate::backend::StateBackend>) -> SourcedBackend + Send + Sync>,
    ) -> Self {
        Self { registry, env, sourced_factory }
    }

    fn backend_for(&self, params: &Params, view: &ObjectView) -> Result<SourcedBackend> {
        let local = self
            .registry
            .resolve(params, &view.object_type, &view.object_name)
            .ok_or_else(|| Error::Precondition {
                object: view.object_name.clone(),
                operation: "resolve backend".to_string(),
                precondition: "a states_<type> backend selector".to_string(),
            })?;
        Ok((self.sourced_factory)(local))
    }

    async fn vm_handle(&self, view: &ObjectView) -> Result<Option<Arc<dyn crate::env::VmHandle>>> {
        let vm_name = view.object_name.split('/').nth(1).unwrap_or(&view.object_name);
        self.env.get_vm(vm_name).await
    }

    #[instrument(skip(self, params))]
    pub async fn show(&self, params: &Params) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for view in iterate(params)? {
            let backend = self.backend_for(params, &view)?;
            let vm = self.vm_handle(&view).await?;
            out.extend(backend.show(&view.params, &view.object_name, vm.as_deref()).await?);
        }
        Ok(out)
    }

    #[instrument(skip(self, params))]
    pub async fn check(&self, params: &Params) -> Result<bool> {
        for view in iterate(params)? {
            let backend = self.backend_for(params, &view)?;
            let vm = self.vm_handle(&view).await?;
            if !backend.check(&view.params, &view.object_name, vm.as_deref()).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs the nested check-before-mutate recursion: narrows `states_chain`
    /// to the object's own type and applies `check_mode` before the outer
    /// verb's own policy is evaluated, so e.g. a `set` on a vm transparently
    /// provisions a missing image root first.
    async fn ensure_precondition(&self, params: &Params, view: &ObjectView) -> Result<()> {
        let leaf_type = view.object_type.split('/').last().unwrap_or(&view.object_type);
        let narrowed = view.params.with_override("states_chain", leaf_type);
        let mode = PolicyMode::parse(&narrowed.get_or("check_mode", &view.object_name, PolicyMode::CHECK_DEFAULT))?;
        let backend = self.backend_for(&narrowed, view)?;
        let vm = self.vm_handle(view).await?;
        let root_exists = backend.check(&narrowed, &view.object_name, vm.as_deref()).await.unwrap_or(false);
        match mode.decide(root_exists) {
            Decision::Force if !root_exists => {
                backend.set_root(&narrowed, &view.object_name, vm.as_deref()).await?;
            }
            Decision::Force if root_exists => {
                backend.unset_root(&narrowed, &view.object_name, vm.as_deref()).await?;
                backend.set_root(&narrowed, &view.object_name, vm.as_deref()).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Runs the get-step decision switch for one object: resolves
    /// `get_mode` against current existence and either raises, skips, or
    /// dispatches to `backend.get`. Shared by `get()` and `pop()` so both
    /// go through the identical Abort/Ignore/Reuse/Force table.
    async fn apply_get(
        &self,
        params: &Params,
        object_name: &str,
        backend: &SourcedBackend,
        vm: Option<&dyn crate::env::VmHandle>,
    ) -> Result<Decision> {
        let exists = backend.check(params, object_name, vm).await?;
        let mode = PolicyMode::parse(&params.get_or("get_mode", object_name, PolicyMode::GET_DEFAULT))?;
        let decision = mode.decide(exists);
        match decision {
            Decision::Abort => {
                return Err(Error::Abort {
                    object: object_name.to_string(),
                    state: params.get_or("get_state", object_name, ""),
                })
            }
            Decision::Ignore => {}
            Decision::Reuse if !exists => {
                return Err(Error::Missing {
                    object: object_name.to_string(),
                    state: params.get_or("get_state", object_name, ""),
                })
            }
            Decision::Reuse | Decision::Force => {
                backend.get(params, object_name, vm).await?;
            }
        }
        Ok(decision)
    }

    /// Runs the set-step decision switch for one object. Shared by `set()`
    /// and `push()`.
    async fn apply_set(
        &self,
        params: &Params,
        object_name: &str,
        backend: &SourcedBackend,
        vm: Option<&dyn crate::env::VmHandle>,
    ) -> Result<()> {
        let exists = backend.check(params, object_name, vm).await?;
        let mode = PolicyMode::parse(&params.get_or("set_mode", object_name, PolicyMode::SET_DEFAULT))?;
        match mode.decide(exists) {
            Decision::Abort => Err(Error::Abort {
                object: object_name.to_string(),
                state: params.get_or("set_state", object_name, ""),
            }),
            Decision::Ignore | Decision::Reuse => Ok(()),
            Decision::Force => backend.set(params, object_name, vm).await,
        }
    }

    /// Runs the unset-step decision switch for one object. Shared by
    /// `unset()` and `pop()`.
    async fn apply_unset(
        &self,
        params: &Params,
        object_name: &str,
        backend: &SourcedBackend,
        vm: Option<&dyn crate::env::VmHandle>,
    ) -> Result<()> {
        let exists = backend.check(params, object_name, vm).await?;
        let mode = PolicyMode::parse(&params.get_or("unset_mode", object_name, PolicyMode::UNSET_DEFAULT))?;
        match mode.decide(exists) {
            Decision::Abort => Err(Error::Abort {
                object: object_name.to_string(),
                state: params.get_or("unset_state", object_name, ""),
            }),
            Decision::Ignore | Decision::Reuse => Ok(()),
            Decision::Force => backend.unset(params, object_name, vm).await,
        }
    }

    #[instrument(skip(self, params))]
    pub async fn get(&self, params: &Params) -> Result<()> {
        for view in iterate(params)? {
            self.ensure_precondition(params, &view).await?;
            let backend = self.backend_for(params, &view)?;
            let vm = self.vm_handle(&view).await?;
            self.apply_get(&view.params, &view.object_name, &backend, vm.as_deref()).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, params))]
    pub async fn set(&self, params: &Params) -> Result<()> {
        for view in iterate(params)? {
            self.ensure_precondition(params, &view).await?;
            let backend = self.backend_for(params, &view)?;
            let vm = self.vm_handle(&view).await?;
            self.apply_set(&view.params, &view.object_name, &backend, vm.as_deref()).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, params))]
    pub async fn unset(&self, params: &Params) -> Result<()> {
        for view in iterate(params)? {
            let backend = self.backend_for(params, &view)?;
            let vm = self.vm_handle(&view).await?;
            self.apply_unset(&view.params, &view.object_name, &backend, vm.as_deref()).await?;
        }
        Ok(())
    }

    /// `push` ≡ iterate then `set` with `push_mode`, skipping reserved names.
    /// Delegates to the same `apply_set` decision switch `set()` uses, so an
    /// existing state under the default `push_mode=af` aborts rather than
    /// silently no-opping.
    #[instrument(skip(self, params))]
    pub async fn push(&self, params: &Params) -> Result<()> {
        for view in iterate(params)? {
            let state = view.params.get_or("push_state", &view.object_name, "");
            if is_reserved(&state) {
                info!(object = %view.object_name, state, "push: reserved state, skipping");
                continue;
            }
            self.ensure_precondition(params, &view).await?;
            let backend = self.backend_for(params, &view)?;
            let vm = self.vm_handle(&view).await?;
            let narrowed = view.params.with_overrides([
                ("set_state".to_string(), state.clone()),
                (
                    "set_mode".to_string(),
                    view.params.get_or("push_mode", &view.object_name, PolicyMode::PUSH_DEFAULT),
                ),
            ]);
            self.apply_set(&narrowed, &view.object_name, &backend, vm.as_deref()).await?;
        }
        Ok(())
    }

    /// `pop` ≡ iterate then `get` then `unset`, skipping reserved names, with
    /// `pop_state`/`pop_mode` temporarily overriding `get_state`/`get_mode`
    /// and `unset_state`/`unset_mode` (defaulting to `get_mode=ra` and
    /// `unset_mode=fa`). Runs through the same `apply_get`/`apply_unset`
    /// decision switches `get()`/`unset()` use, so a missing state aborts
    /// instead of being swallowed, and the unset step honours whatever
    /// `unset_mode` resolves to instead of unconditionally forcing it.
    #[instrument(skip(self, params))]
    pub async fn pop(&self, params: &Params) -> Result<()> {
        for view in iterate(params)? {
            let state = view.params.get_or("pop_state", &view.object_name, "");
            if is_reserved(&state) {
                info!(object = %view.object_name, state, "pop: reserved state, skipping");
                continue;
            }
            self.ensure_precondition(params, &view).await?;
            let backend = self.backend_for(params, &view)?;
            let vm = self.vm_handle(&view).await?;
            let narrowed = view.params.with_overrides([
                ("get_state".to_string(), state.clone()),
                ("get_mode".to_string(), view.params.get_or("pop_mode", &view.object_name, PolicyMode::GET_DEFAULT)),
                ("unset_state".to_string(), state.clone()),
                (
                    "unset_mode".to_string(),
                    view.params.get_or("pop_mode", &view.object_name, PolicyMode::POP_UNSET_DEFAULT),
                ),
            ]);
            let decision = self.apply_get(&narrowed, &view.object_name, &backend, vm.as_deref()).await?;
            if decision != Decision::Ignore {
                self.apply_unset(&narrowed, &view.object_name, &backend, vm.as_deref()).await?;
            }
        }
        Ok(())
    }
}
