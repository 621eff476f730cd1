use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "/var/lib/coral";
const DEFAULT_LOG_DIR: &str = "/var/log/coral";
const DEFAULT_LOCK_DIR: &str = "/run/coraladm";
const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";
const DEFAULT_LOGROTATE_DIR: &str = "/etc/logrotate.d";

pub const DEFAULT_IMAGE: &str = "docker.io/coral/daemon-base:latest";
pub const DATA_DIR_MODE: u32 = 0o700;

fn env_or(var: &str, default: &str) -> PathBuf {
    let path = std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default));
    tracing::trace!(var = var, path = %path.display(), "Resolved directory");
    path
}

/// Daemon data root ($CORAL_DATA_DIR or /var/lib/coral)
pub fn data_dir() -> PathBuf {
    env_or("CORAL_DATA_DIR", DEFAULT_DATA_DIR)
}

/// Cluster log root ($CORAL_LOG_DIR or /var/log/coral)
pub fn log_dir() -> PathBuf {
    env_or("CORAL_LOG_DIR", DEFAULT_LOG_DIR)
}

/// Lock file directory ($CORAL_LOCK_DIR or /run/coraladm)
pub fn lock_dir() -> PathBuf {
    env_or("CORAL_LOCK_DIR", DEFAULT_LOCK_DIR)
}

/// Systemd unit directory ($CORAL_UNIT_DIR or /etc/systemd/system)
pub fn unit_dir() -> PathBuf {
    env_or("CORAL_UNIT_DIR", DEFAULT_UNIT_DIR)
}

/// Logrotate drop-in directory ($CORAL_LOGROTATE_DIR or /etc/logrotate.d)
pub fn logrotate_dir() -> PathBuf {
    env_or("CORAL_LOGROTATE_DIR", DEFAULT_LOGROTATE_DIR)
}

/// Locate the container runtime binary on $PATH, podman preferred.
pub fn find_container_runtime() -> Option<PathBuf> {
    for name in ["podman", "docker"] {
        if let Some(path) = find_executable(name) {
            tracing::debug!(runtime = %path.display(), "Using container runtime");
            return Some(path);
        }
    }
    None
}

/// Search $PATH for an executable, like `which`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dirs() {
        // Only assert the compiled defaults when no override is present.
        if std::env::var("CORAL_DATA_DIR").is_err() {
            assert_eq!(data_dir(), PathBuf::from("/var/lib/coral"));
        }
        if std::env::var("CORAL_UNIT_DIR").is_err() {
            assert_eq!(unit_dir(), PathBuf::from("/etc/systemd/system"));
        }
    }

    #[test]
    fn test_find_executable_missing() {
        assert!(find_executable("definitely-not-a-real-binary-xyz").is_none());
    }
}
