use std::path::PathBuf;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::hostenv;

/// Per-invocation state threaded through every call.
///
/// Carries the resolved directory layout, the container runtime path, the
/// default subprocess timeout and the stdin bytes (read at most once, for
/// `--config-json -`). No process-wide singletons.
pub struct Ctx {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub unit_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub logrotate_dir: PathBuf,
    /// Absolute path of the podman/docker binary.
    pub container_path: PathBuf,
    /// Default bound for subprocess calls, seconds. `None` = unbounded.
    pub timeout: Option<u64>,
    /// Pass `--init` to containers.
    pub container_init: bool,
    cached_stdin: OnceLock<String>,
}

impl Ctx {
    /// Build a context from the host environment, discovering the
    /// container runtime on $PATH.
    pub fn from_host() -> Result<Self> {
        let container_path = hostenv::find_container_runtime().ok_or_else(|| {
            Error::validation("no container runtime found (need podman or docker on PATH)")
        })?;
        Ok(Self::with_runtime(container_path))
    }

    /// Build a context around a known runtime path. Directory locations
    /// still come from the environment.
    pub fn with_runtime(container_path: PathBuf) -> Self {
        Self {
            data_dir: hostenv::data_dir(),
            log_dir: hostenv::log_dir(),
            unit_dir: hostenv::unit_dir(),
            lock_dir: hostenv::lock_dir(),
            logrotate_dir: hostenv::logrotate_dir(),
            container_path,
            timeout: None,
            container_init: false,
            cached_stdin: OnceLock::new(),
        }
    }

    /// Whether the runtime is podman (selects forking-mode unit shape).
    pub fn uses_podman(&self) -> bool {
        self.container_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.contains("podman"))
            .unwrap_or(false)
    }

    /// Read stdin to a string, at most once per invocation.
    pub fn read_stdin(&self) -> Result<&str> {
        if let Some(cached) = self.cached_stdin.get() {
            return Ok(cached);
        }
        let mut buf = String::new();
        use std::io::Read;
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(self.cached_stdin.get_or_init(|| buf))
    }
}
