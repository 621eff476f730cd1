use std::path::PathBuf;
use thiserror::Error;

/// Error kinds surfaced by the agent core.
///
/// Mutating operations fail fast with one of these; the CLI boundary turns
/// any of them into a single-line message and a non-zero exit. Status
/// probes (systemd queries, runtime inspect) that fail to execute are
/// recovered locally as "unknown" state and never produce an `Error`.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed fsid, empty daemon id, missing required config file,
    /// malformed config-json.
    #[error("{0}")]
    Validation(String),

    /// The per-cluster lock could not be acquired within the timeout.
    #[error("the cluster lock '{0}' could not be acquired")]
    LockTimeout(PathBuf),

    /// A requested TCP port is already bound; raised before any mutation.
    #[error("TCP port(s) {ports:?} required for {daemon_type} already in use")]
    PortInUse { daemon_type: String, ports: Vec<u16> },

    /// Non-zero exit from the container runtime or systemctl.
    #[error("command failed: {command}: exit {code}\nstdout: {stdout}\nstderr: {stderr}")]
    Subprocess {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// A child process did not finish within the configured bound.
    #[error("command '{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
