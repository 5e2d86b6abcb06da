//! Structured logging initialisation for the CLI/test-harness binary. The
//! core itself never calls into this module; it only ever emits through
//! `tracing` macros and lets the embedding binary decide how to subscribe.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` with an env-filter defaulting to `info`,
/// honouring `RUST_LOG` when set.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
