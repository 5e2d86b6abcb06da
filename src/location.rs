//! Location parsing and scope classification.
//!
//! A location string has the form `<gateway>/<host>:<path>`. Empty
//! gateway/host means local filesystem; a `path` prefixed with `;` selects
//! symlink-mode caching; otherwise a non-empty gateway/host selects remote
//! SSH transport.

use crate::error::{Error, Result};
use crate::params::Params;

/// A parsed pool/cache location.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    pub gateway: String,
    pub host: String,
    pub path: String,
    pub symlink: bool,
}

impl Location {
    /// Parses a single `<gateway>/<host>:<path>` token.
    pub fn parse(raw: &str) -> Result<Self> {
        let (prefix, path) = raw
            .split_once(':')
            .ok_or_else(|| Error::InvalidLocation {
                location: raw.to_string(),
                reason: "missing ':' separating host from path".to_string(),
            })?;
        let (gateway, host) = match prefix.split_once('/') {
            Some((g, h)) => (g.to_string(), h.to_string()),
            None => (String::new(), prefix.to_string()),
        };
        let (symlink, path) = match path.strip_prefix(';') {
            Some(rest) => (true, rest.to_string()),
            None => (false, path.to_string()),
        };
        if path.is_empty() {
            return Err(Error::InvalidLocation {
                location: raw.to_string(),
                reason: "empty path".to_string(),
            });
        }
        Ok(Self {
            gateway,
            host,
            path,
            symlink,
        })
    }

    /// Parses a whitespace-separated list of locations, as found in
    /// `<op>_location[_scope]` parameter values.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        raw.split_whitespace().map(Self::parse).collect()
    }

    pub fn is_local(&self) -> bool {
        self.gateway.is_empty() && self.host.is_empty()
    }

    /// Proximity score relative to this process's own identity: +1000 same
    /// gateway, +100 same host, +10 matching swarm path, +1 otherwise.
    /// Higher is closer.
    pub fn proximity(&self, own: &OwnIdentity) -> i64 {
        if self.gateway != own.gateway {
            return 1;
        }
        if self.host != own.host {
            return 1000;
        }
        if self.path == own.swarm_path {
            return 1000 + 100 + 10;
        }
        1000 + 100
    }

    /// Classifies this location's scope relative to the process identity
    /// and the configured shared pool path.
    pub fn scope(&self, own: &OwnIdentity) -> Scope {
        if self.gateway != own.gateway {
            return Scope::Cluster;
        }
        if self.host != own.host {
            return Scope::Swarm;
        }
        if self.path == own.swarm_path {
            return Scope::Own;
        }
        if self.path == own.shared_pool {
            return Scope::Shared;
        }
        Scope::Shared
    }
}

/// This process's identity, used to classify the scope of a [`Location`].
#[derive(Clone, Debug, Default)]
pub struct OwnIdentity {
    pub gateway: String,
    pub host: String,
    pub swarm_path: String,
    pub shared_pool: String,
}

impl OwnIdentity {
    /// Builds the process identity from the well-known parameter keys.
    pub fn from_params(params: &Params, object: &str) -> Self {
        Self {
            gateway: params.get_or("nets_gateway", object, ""),
            host: params.get_or("nets_host", object, ""),
            swarm_path: params.get_or("swarm_pool", object, ""),
            shared_pool: params.get_or("shared_pool", object, ""),
        }
    }
}

/// The coarsened classification of a location relative to this process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Scope {
    Own,
    Swarm,
    Shared,
    Cluster,
}

impl Scope {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "own" => Some(Scope::Own),
            "swarm" => Some(Scope::Swarm),
            "shared" => Some(Scope::Shared),
            "cluster" => Some(Scope::Cluster),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Own => "own",
            Scope::Swarm => "swarm",
            Scope::Shared => "shared",
            Scope::Cluster => "cluster",
        }
    }
}

/// Parses the `pool_scope` parameter into the set of permitted scopes.
pub fn permitted_scopes(params: &Params, object: &str) -> Vec<Scope> {
    params
        .objects_scoped("pool_scope", object)
        .iter()
        .filter_map(|s| Scope::parse(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_plain() {
        let loc = Location::parse(":/pool/vm1").unwrap();
        assert!(loc.is_local());
        assert_eq!(loc.path, "/pool/vm1");
        assert!(!loc.symlink);
    }

    #[test]
    fn parses_symlink_mode() {
        let loc = Location::parse(":;/pool/vm1").unwrap();
        assert!(loc.symlink);
        assert_eq!(loc.path, "/pool/vm1");
    }

    #[test]
    fn parses_remote() {
        let loc = Location::parse("gw1/host1:/pool/vm1").unwrap();
        assert_eq!(loc.gateway, "gw1");
        assert_eq!(loc.host, "host1");
        assert!(!loc.is_local());
    }

    #[test]
    fn proximity_orders_strictly_non_increasing() {
        let own = OwnIdentity {
            gateway: "gw".into(),
            host: "h1".into(),
            swarm_path: "/swarm".into(),
            shared_pool: "/shared".into(),
        };
        let same_swarm = Location::parse("gw/h1:/swarm").unwrap();
        let same_host = Location::parse("gw/h1:/other").unwrap();
        let cluster = Location::parse("gw2/h2:/other").unwrap();
        assert!(same_swarm.proximity(&own) >= same_host.proximity(&own));
        assert!(same_host.proximity(&own) >= cluster.proximity(&own));
    }

    #[test]
    fn scope_classification() {
        let own = OwnIdentity {
            gateway: "gw".into(),
            host: "h1".into(),
            swarm_path: "/swarm".into(),
            shared_pool: "/shared".into(),
        };
        assert_eq!(
            Location::parse("gw/h1:/swarm").unwrap().scope(&own),
            Scope::Own
        );
        assert_eq!(
            Location::parse("gw/h1:/other").unwrap().scope(&own),
            Scope::Swarm
        );
        assert_eq!(
            Location::parse("gw/h2:/shared").unwrap().scope(&own),
            Scope::Swarm
        );
        assert_eq!(
            Location::parse("gw2/h2:/shared").unwrap().scope(&own),
            Scope::Cluster
        );
    }
}
