//! Process-wide SSH session cache.
//!
//! One [`openssh::Session`] per host, kept alive for the process lifetime
//! and flushed only at teardown, per the design note on process-wide
//! mutable state: a small struct with lazy initialisation rather than a
//! bare global.

use crate::error::{Error, Result};
use openssh::{KnownHosts, Session, SessionBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Connection parameters for a host, drawn from the `nets_shell_*`
/// parameter keys.
#[derive(Clone, Debug, Default)]
pub struct SshParams {
    pub user: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<Mutex<HashMap<String, Arc<Session>>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a cached session for `host`, connecting and caching a new
    /// one on first use.
    pub async fn get(&self, host: &str, params: &SshParams) -> Result<Arc<Session>> {
        let mut sessions = self.inner.lock().await;
        if let Some(session) = sessions.get(host) {
            return Ok(session.clone());
        }

        debug!(host, "opening new ssh session");
        let mut dest = String::new();
        if let Some(user) = &params.user {
            dest.push_str(user);
            dest.push('@');
        }
        dest.push_str(host);

        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        if let Some(port) = params.port {
            builder.port(port);
        }
        let session = builder
            .connect(&dest)
            .await
            .map_err(|e| Error::SshTransport {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let session = Arc::new(session);
        sessions.insert(host.to_string(), session.clone());
        Ok(session)
    }

    /// Closes and forgets every cached session; called at process teardown.
    pub async fn teardown(&self) {
        let mut sessions = self.inner.lock().await;
        for (host, session) in sessions.drain() {
            if let Ok(session) = Arc::try_unwrap(session) {
                let _ = session.close().await;
            } else {
                debug!(host, "session still referenced at teardown, leaking cleanup");
            }
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}
