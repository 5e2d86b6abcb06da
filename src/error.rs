//! Error taxonomy for the state-management core.
//!
//! Every fallible operation in this crate returns [`Error`]. Each variant
//! maps to exactly one of the eight kinds from the error handling design;
//! callers that need to branch on the kind (a CLI exit code, a harness
//! abort) should match on [`Error::kind`] rather than on the display string.

use snafu::Snafu;

/// Coarse classification of an [`Error`], independent of which component
/// raised it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A policy letter `a` fired.
    Abort,
    /// Requested state is absent and policy did not permit that.
    Missing,
    /// Operation attempted without its prerequisite.
    Precondition,
    /// Illegal input: unknown policy letter, unsettable pointer, bad location.
    Invalid,
    /// Lower-level I/O, SSH, or hash-compare failure.
    Transport,
    /// Mirrors disagree on presence.
    Inconsistent,
    /// A lock wait exceeded its bound.
    Timeout,
    /// Backend-specific failure.
    Backend,
}

/// The single error type surfaced across the state-management core.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("aborting: state '{state}' of {object} triggered policy letter 'a'"))]
    Abort { object: String, state: String },

    #[snafu(display("state '{state}' of {object} does not exist"))]
    Missing { object: String, state: String },

    #[snafu(display("{operation} on {object} requires {precondition}, which is not satisfied"))]
    Precondition {
        object: String,
        operation: String,
        precondition: String,
    },

    #[snafu(display("invalid policy letter '{letter}' in mode string '{mode}'"))]
    InvalidPolicyLetter { mode: String, letter: char },

    #[snafu(display("invalid location '{location}': {reason}"))]
    InvalidLocation {
        #[snafu(implicit(false))]
        location: String,
        reason: String,
    },

    #[snafu(display("state '{state}' is the backend's implementation pointer and cannot be unset"))]
    InvalidPointerUnset { state: String },

    #[snafu(display("backing chain for '{state}' exceeds the maximum depth of {max_depth}"))]
    ChainTooDeep { state: String, max_depth: usize },

    #[snafu(display("hierarchy has no configured states_chain"))]
    NoStatesChain {},

    #[snafu(display("transport failure during {operation} on {path}: {source}"))]
    Transport {
        operation: String,
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("SSH transport failure for host {host}: {reason}"))]
    SshTransport { host: String, reason: String },

    #[snafu(display("mirrors disagree on presence of state '{state}' for {object}"))]
    Inconsistent { object: String, state: String },

    #[snafu(display("timed out after {elapsed:?} waiting for lock on {path}"))]
    LockTimeout {
        path: String,
        elapsed: std::time::Duration,
    },

    #[snafu(display("{backend} backend failed to {operation} on {object}: {reason}"))]
    Backend {
        backend: String,
        object: String,
        operation: String,
        reason: String,
    },

    #[snafu(display("{command} command failed: {error}"))]
    CommandFailed { command: String, error: String },

    #[snafu(display("failed to spawn/wait for {command}: {source}"))]
    CommandSpawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse {command} output as json: {error}"))]
    JsonParsing { command: String, error: String },
}

impl Error {
    /// Classifies this error into one of the eight kinds from the error
    /// handling design. Used by the CLI/test harness to map to exit codes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Abort { .. } => ErrorKind::Abort,
            Error::Missing { .. } => ErrorKind::Missing,
            Error::Precondition { .. } => ErrorKind::Precondition,
            Error::InvalidPolicyLetter { .. }
            | Error::InvalidLocation { .. }
            | Error::InvalidPointerUnset { .. }
            | Error::ChainTooDeep { .. }
            | Error::NoStatesChain {} => ErrorKind::Invalid,
            Error::Transport { .. } | Error::SshTransport { .. } => ErrorKind::Transport,
            Error::Inconsistent { .. } => ErrorKind::Inconsistent,
            Error::LockTimeout { .. } => ErrorKind::Timeout,
            Error::Backend { .. }
            | Error::CommandFailed { .. }
            | Error::CommandSpawn { .. }
            | Error::JsonParsing { .. } => ErrorKind::Backend,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
