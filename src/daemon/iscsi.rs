//! iSCSI gateway daemon. Runs rbd-target-api plus a tcmu-runner
//! sidecar, both privileged, sharing the kernel configfs tree through a
//! bind below the data dir.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fsutil::{self, Owner};
use crate::hostenv;

use super::{require_files, validate_identity, ConfigBlob, DaemonName, Descriptor};

pub const ENTRYPOINT: &str = "/usr/bin/rbd-target-api";
pub const TCMU_ENTRYPOINT: &str = "/usr/bin/tcmu-runner";

const REQUIRED_FILES: &[&str] = &["iscsi-gateway.cfg"];

#[derive(Debug)]
pub struct IscsiGateway {
    fsid: String,
    name: DaemonName,
    image: String,
    files: HashMap<String, String>,
    log_dir: PathBuf,
}

impl IscsiGateway {
    pub fn init(fsid: &str, name: DaemonName, config: ConfigBlob, image: &str) -> Result<Self> {
        Ok(Self {
            fsid: fsid.to_string(),
            name,
            image: image.to_string(),
            files: config.files(),
            log_dir: hostenv::log_dir().join(fsid),
        })
    }

    /// Shell fragment mounting (or unmounting) configfs below the data
    /// dir, idempotent against /proc/mounts. Goes into unit.run and
    /// unit.poststop.
    pub fn configfs_mount_cmd(data_dir: &Path, mount: bool) -> String {
        let path = data_dir.join("configfs");
        let path = path.display();
        if mount {
            format!("if ! grep -qs {path} /proc/mounts; then mount -t configfs none {path}; fi")
        } else {
            format!("if grep -qs {path} /proc/mounts; then umount {path}; fi")
        }
    }
}

impl Descriptor for IscsiGateway {
    fn fsid(&self) -> &str {
        &self.fsid
    }

    fn name(&self) -> &DaemonName {
        &self.name
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn validate(&self) -> Result<()> {
        validate_identity(&self.fsid, &self.name, &self.image)?;
        require_files(&self.files, REQUIRED_FILES)
    }

    fn container_mounts(&self, data_dir: &Path) -> HashMap<String, String> {
        let mut mounts = HashMap::new();
        let d = |sub: &str| data_dir.join(sub).display().to_string();
        mounts.insert(d("config"), "/etc/coral/coral.conf:z".into());
        mounts.insert(d("keyring"), "/etc/coral/keyring:z".into());
        mounts.insert(d("iscsi-gateway.cfg"), "/etc/coral/iscsi-gateway.cfg:z".into());
        mounts.insert(d("configfs"), "/sys/kernel/config".into());
        mounts.insert(
            self.log_dir.display().to_string(),
            "/var/log/rbd-target-api:z".into(),
        );
        mounts.insert("/dev".into(), "/dev".into());
        mounts
    }

    fn daemon_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn container_binds(&self, _data_dir: &Path) -> Vec<Vec<String>> {
        vec![vec![
            "type=bind".into(),
            "source=/lib/modules".into(),
            "destination=/lib/modules".into(),
            "ro=true".into(),
        ]]
    }

    fn materialize_files(&self, data_dir: &Path, owner: Owner) -> Result<()> {
        fsutil::makedirs(&data_dir.join("configfs"), 0o755, Some(owner))?;
        for (fname, content) in &self.files {
            fsutil::write_atomic(&data_dir.join(fname), content, 0o600, Some(owner))?;
        }
        Ok(())
    }
}
