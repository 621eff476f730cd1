//! Filesystem helpers shared by every component that publishes files.
//!
//! All unit/config/script content goes through [`write_atomic`]: write to
//! `<path>.new`, set mode and ownership, then rename into place. A crash
//! mid-write leaves the previous fully-renamed file intact.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::error::Result;

/// Numeric owner applied to published files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    pub fn root() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

/// Atomically publish `content` at `path` with the given mode and owner.
pub fn write_atomic(path: &Path, content: &str, mode: u32, owner: Option<Owner>) -> Result<()> {
    // append rather than with_extension: unit.run must stage as
    // unit.run.new, not collide with unit.poststop on unit.new
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".new");
    let tmp = std::path::PathBuf::from(tmp);
    {
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp)?;
        f.write_all(content.as_bytes())?;
        // creation honors the umask; force the exact mode
        f.set_permissions(fs::Permissions::from_mode(mode))?;
        if let Some(Owner { uid, gid }) = owner {
            std::os::unix::fs::fchown(&f, Some(uid), Some(gid))?;
        }
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Create a directory (and parents) with the given mode and owner.
/// Existing directories are re-chowned/re-moded, not an error.
pub fn makedirs(path: &Path, mode: u32, owner: Option<Owner>) -> Result<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    if let Some(Owner { uid, gid }) = owner {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
    }
    Ok(())
}

/// Mtime of a file as an RFC 3339 UTC string, if the file exists.
pub fn file_timestamp(path: &Path) -> Option<String> {
    let mtime = fs::metadata(path).ok()?.modified().ok()?;
    let dt: chrono::DateTime<chrono::Utc> = mtime.into();
    Some(dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_publishes_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.run");
        write_atomic(&path, "set -e\n", 0o600, None).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "set -e\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        // no temp file left behind
        assert!(!dir.path().join("unit.run.new").exists());
    }

    #[test]
    fn test_write_atomic_appends_temp_suffix() {
        // dotted names must keep their extension in the staged file so
        // unit.run and unit.poststop never share a temp name
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("unit.run");
        let poststop = dir.path().join("unit.poststop");
        write_atomic(&run, "run", 0o600, None).unwrap();
        write_atomic(&poststop, "poststop", 0o600, None).unwrap();
        assert_eq!(fs::read_to_string(&run).unwrap(), "run");
        assert_eq!(fs::read_to_string(&poststop).unwrap(), "poststop");
        assert!(!dir.path().join("unit.new").exists());
    }

    #[test]
    fn test_write_atomic_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        write_atomic(&path, "first", 0o600, None).unwrap();
        write_atomic(&path, "second", 0o600, None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_makedirs_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c");
        makedirs(&path, 0o700, None).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn test_file_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.created");
        assert!(file_timestamp(&path).is_none());
        fs::write(&path, "x").unwrap();
        let ts = file_timestamp(&path).unwrap();
        assert!(ts.contains('T'));
    }
}
