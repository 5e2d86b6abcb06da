//! Sourced backend (C4): composes a local backend with N pool transports,
//! picking mirrors by proximity and validating freshness via chain hashing.

use crate::backend::StateBackend;
use crate::chain::{compare_chain, resolve_chain, transfer_chain, Direction, ImageProbe};
use crate::env::VmHandle;
use crate::error::{Error, Result};
use crate::location::{permitted_scopes, Location, OwnIdentity, Scope};
use crate::params::Params;
use crate::transfer::{Dispatcher, TransferOps};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A pool source ranked by proximity.
struct RankedSource {
    location: Location,
}

/// Composition wrapper described in §4.4: local action plus N transports,
/// operating on image-family states addressed by `<swarm_pool>/<object>/<state>.qcow2`.
pub struct SourcedBackend {
    local: Arc<dyn StateBackend>,
    dispatcher: Arc<Dispatcher>,
    probe: Arc<dyn ImageProbe>,
}

impl SourcedBackend {
    pub fn new(local: Arc<dyn StateBackend>, dispatcher: Arc<Dispatcher>, probe: Arc<dyn ImageProbe>) -> Self {
        Self { local, dispatcher, probe }
    }

    fn cache_dir(&self, params: &Params, object: &str) -> PathBuf {
        let pool = params.get_or("swarm_pool", object, "/tmp/vmstate");
        PathBuf::from(pool).join(object.replace('/', "_"))
    }

    /// Enumerates and ranks the pool sources configured for `op`, filtered
    /// to scopes present in `pool_scope`. `own` sources are excluded: those
    /// are the local backend's job.
    fn sources(&self, params: &Params, op: &str, object: &str) -> Result<Vec<RankedSource>> {
        let own = OwnIdentity::from_params(params, object);
        let permitted = permitted_scopes(params, object);
        let raw = params.get_or(&format!("{op}_location"), object, "");
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let mut ranked: Vec<(Location, i64)> = Location::parse_list(&raw)?
            .into_iter()
            .filter_map(|location| {
                let scope = location.scope(&own);
                if scope == Scope::Own || !permitted.contains(&scope) {
                    return None;
                }
                let score = location.proximity(&own);
                Some((location, score))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(ranked.into_iter().map(|(location, _)| RankedSource { location }).collect())
    }

    fn own_permitted(&self, params: &Params, object: &str) -> bool {
        permitted_scopes(params, object).contains(&Scope::Own)
    }

    #[instrument(skip(self, params, vm))]
    pub async fn show(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<Vec<String>> {
        let mut result = if self.own_permitted(params, object) {
            self.local.show(params, object, vm).await?
        } else {
            Vec::new()
        };

        let sources = self.sources(params, "show", object)?;
        let mut pool_listings = Vec::new();
        for source in &sources {
            pool_listings.push(self.dispatcher.list(&source.location).await?);
        }
        if let Some((first, rest)) = pool_listings.split_first() {
            let mut intersection = first.clone();
            for listing in rest {
                intersection.retain(|s| listing.contains(s));
            }
            for state in intersection {
                if !result.contains(&state) {
                    result.push(state);
                }
            }
        }
        Ok(result)
    }

    #[instrument(skip(self, params, vm))]
    pub async fn check(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        let state = params.get_or("check_state", object, "");
        let local_has = if self.own_permitted(params, object) {
            self.local.check(params, object, vm).await?
        } else {
            false
        };
        if local_has {
            return Ok(true);
        }

        let sources = self.sources(params, "check", object)?;
        if sources.is_empty() {
            return Ok(false);
        }
        let mut any_true = false;
        let mut any_false = false;
        for source in &sources {
            let listing = self.dispatcher.list(&source.location).await?;
            if listing.contains(&state) {
                any_true = true;
            } else {
                any_false = true;
            }
        }
        if any_true && any_false {
            return Err(Error::Inconsistent {
                object: object.to_string(),
                state,
            });
        }
        Ok(any_true)
    }

    /// Downloads the backing chain from the best-scoring source when the
    /// cache is stale or missing, then invokes the local backend's `get`.
    #[instrument(skip(self, params, vm))]
    pub async fn get(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        let state = params.get_or("get_state", object, "");
        let sources = self.sources(params, "get", object)?;
        if let Some(best) = sources.first() {
            let cache_dir = self.cache_dir(params, object);
            let pool_dir = PathBuf::from(&best.location.path);
            let transport = self.dispatcher.transport_for(&best.location);
            let pool_listing = self.dispatcher.list(&best.location).await?;
            if pool_listing.contains(&state) {
                let fresh = compare_chain(
                    &transport,
                    &*self.probe,
                    &cache_dir,
                    &pool_dir,
                    &state,
                    false,
                    None,
                    None,
                )
                .await
                .unwrap_or(false);
                if !fresh {
                    debug!(object, state, "cache stale or missing, downloading chain");
                    transfer_chain(
                        &transport,
                        &*self.probe,
                        &cache_dir,
                        &pool_dir,
                        &state,
                        Direction::Download,
                        false,
                        None,
                        None,
                    )
                    .await?;
                }
            }
        }
        if self.own_permitted(params, object) {
            self.local.get(params, object, vm).await?;
        }
        Ok(())
    }

    /// Calls local `set` when `own` is permitted, then uploads to every
    /// permitted non-own source in proximity order.
    #[instrument(skip(self, params, vm))]
    pub async fn set(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        let state = params.get_or("set_state", object, "");
        let own_permitted = self.own_permitted(params, object);
        if own_permitted {
            self.local.set(params, object, vm).await?;
        } else {
            let cache_dir = self.cache_dir(params, object);
            if resolve_chain(&*self.probe, &cache_dir, &state).await.is_err() {
                return Err(Error::Precondition {
                    object: object.to_string(),
                    operation: "set".to_string(),
                    precondition: "a local state to upload (own scope excluded)".to_string(),
                });
            }
        }

        let cache_dir = self.cache_dir(params, object);
        for source in self.sources(params, "set", object)? {
            let pool_dir = PathBuf::from(&source.location.path);
            let transport = self.dispatcher.transport_for(&source.location);
            transfer_chain(
                &transport,
                &*self.probe,
                &cache_dir,
                &pool_dir,
                &state,
                Direction::Upload,
                false,
                None,
                None,
            )
            .await?;
        }
        Ok(())
    }

    /// Mirrors `set`: local unset, then per-source transport delete.
    #[instrument(skip(self, params, vm))]
    pub async fn unset(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        let state = params.get_or("unset_state", object, "");
        if self.own_permitted(params, object) {
            self.local.unset(params, object, vm).await?;
        }
        for source in self.sources(params, "unset", object)? {
            let pool_path = PathBuf::from(&source.location.path).join(format!("{state}.qcow2"));
            self.dispatcher
                .transport_for(&source.location)
                .delete(&pool_path)
                .await?;
        }
        Ok(())
    }

    pub async fn check_root(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<bool> {
        self.local.check_root(params, object, vm).await
    }

    /// Root operations are mutually exclusive between `own` and `shared`
    /// scope: a local root can only be (re)built when `own` is permitted.
    pub async fn set_root(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        if !self.own_permitted(params, object) {
            return Err(Error::Precondition {
                object: object.to_string(),
                operation: "set_root".to_string(),
                precondition: "own scope permitted".to_string(),
            });
        }
        self.local.set_root(params, object, vm).await
    }

    pub async fn unset_root(&self, params: &Params, object: &str, vm: Option<&dyn VmHandle>) -> Result<()> {
        if !self.own_permitted(params, object) {
            return Err(Error::Precondition {
                object: object.to_string(),
                operation: "unset_root".to_string(),
                precondition: "own scope permitted".to_string(),
            });
        }
        self.local.unset_root(params, object, vm).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::StubProbe;
    use std::collections::HashMap;
    use std::time::Duration;

    struct NullBackend;

    #[async_trait::async_trait]
    impl StateBackend for NullBackend {
        async fn show(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<Vec<String>> {
            Ok(vec!["launch".to_string()])
        }
        async fn check(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<bool> {
            Ok(true)
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
            Ok(true)
        }
        async fn set_root(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<()> {
            Ok(())
        }
        async fn unset_root(&self, _p: &Params, _o: &str, _v: Option<&dyn VmHandle>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn show_with_no_pool_locations_returns_local_only() {
        let sourced = SourcedBackend::new(
            Arc::new(NullBackend),
            Arc::new(Dispatcher::new(Duration::from_secs(1), true)),
            Arc::new(StubProbe { backing: HashMap::new() }),
        );
        let mut data = HashMap::new();
        data.insert("pool_scope".to_string(), "own".to_string());
        let params = Params::new(data);
        let states = sourced.show(&params, "vm1/image1", None).await.unwrap();
        assert_eq!(states, vec!["launch".to_string()]);
    }
}
