//! Core storage daemons: mon, mgr, mds, osd, rgw, mirror, crash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::container::{container_name, ContainerSpec};
use crate::error::Result;
use crate::fsutil::{self, Owner};
use crate::hostenv;

use super::{validate_identity, ConfigBlob, DaemonName, Descriptor};

#[derive(Debug)]
pub struct CoreDaemon {
    fsid: String,
    name: DaemonName,
    image: String,
    pub config: Option<String>,
    pub keyring: Option<String>,
    /// Volume id of the backing device set, required for osd
    /// activate/deactivate hooks.
    pub osd_fsid: Option<String>,
    log_dir: PathBuf,
}

impl CoreDaemon {
    pub fn init(fsid: &str, name: DaemonName, config: ConfigBlob, image: &str) -> Result<Self> {
        Ok(Self {
            fsid: fsid.to_string(),
            name,
            image: image.to_string(),
            config: config.get_str("config"),
            keyring: config.get_str("keyring"),
            osd_fsid: config.get_str("osd_fsid"),
            log_dir: hostenv::log_dir().join(fsid),
        })
    }

    pub fn entrypoint(&self) -> String {
        format!("/usr/bin/coral-{}", self.name.daemon_type)
    }

    /// The `-n` identity the daemon registers under.
    pub fn auth_name(&self) -> String {
        match self.name.daemon_type.as_str() {
            "rgw" | "mirror" | "crash" => {
                format!("client.{}.{}", self.name.daemon_type, self.name.daemon_id)
            }
            _ => self.name.to_string(),
        }
    }

    /// Fixed args preceding [`Descriptor::daemon_args`].
    pub fn fixed_args(&self) -> Vec<String> {
        match self.name.daemon_type.as_str() {
            "crash" => vec!["-n".into(), self.auth_name()],
            _ => vec!["-n".into(), self.auth_name(), "-f".into()],
        }
    }

    /// mon and osd need device access through libudev.
    pub fn privileged(&self) -> bool {
        matches!(self.name.daemon_type.as_str(), "mon" | "osd")
    }

    fn is_crash(&self) -> bool {
        self.name.daemon_type == "crash"
    }

    /// One-shot privileged container activating the osd's volumes before
    /// the main daemon starts.
    pub fn activate_container(&self, data_dir: &Path) -> Option<ContainerSpec> {
        let osd_fsid = self.osd_fsid.as_deref()?;
        Some(
            ContainerSpec::new(&self.image)
                .entrypoint("/usr/sbin/coral-volume")
                .args([
                    "lvm",
                    "activate",
                    &self.name.daemon_id,
                    osd_fsid,
                    "--no-systemd",
                ])
                .privileged(true)
                .volume_mounts(self.container_mounts(data_dir))
                .cname(container_name(
                    &self.fsid,
                    &self.name.to_string(),
                    Some("activate"),
                )),
        )
    }

    /// Inverse of [`Self::activate_container`], run from unit.poststop.
    pub fn deactivate_container(&self, data_dir: &Path) -> Option<ContainerSpec> {
        let osd_fsid = self.osd_fsid.as_deref()?;
        Some(
            ContainerSpec::new(&self.image)
                .entrypoint("/usr/sbin/coral-volume")
                .args(["lvm", "deactivate", &self.name.daemon_id, osd_fsid])
                .privileged(true)
                .volume_mounts(self.container_mounts(data_dir))
                .cname(container_name(
                    &self.fsid,
                    &self.name.to_string(),
                    Some("deactivate"),
                )),
        )
    }
}

impl Descriptor for CoreDaemon {
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
        validate_identity(&self.fsid, &self.name, &self.image)
    }

    fn container_mounts(&self, data_dir: &Path) -> HashMap<String, String> {
        let mut mounts = HashMap::new();
        let t = self.name.daemon_type.as_str();

        let run_path = PathBuf::from("/var/run/coral").join(&self.fsid);
        if run_path.exists() {
            mounts.insert(
                run_path.display().to_string(),
                "/var/run/coral:z".to_string(),
            );
        }
        mounts.insert(
            self.log_dir.display().to_string(),
            "/var/log/coral:z".to_string(),
        );
        let crash_dir = hostenv::data_dir().join(&self.fsid).join("crash");
        if crash_dir.exists() {
            mounts.insert(
                crash_dir.display().to_string(),
                "/var/lib/coral/crash:z".to_string(),
            );
        }

        // in-container data path follows the flat legacy layout the
        // daemon binaries expect
        let cdata_dir = if t == "rgw" {
            format!("/var/lib/coral/rgw/coral-rgw.{}", self.name.daemon_id)
        } else {
            format!("/var/lib/coral/{}/coral-{}", t, self.name.daemon_id)
        };
        if !self.is_crash() {
            mounts.insert(data_dir.display().to_string(), format!("{cdata_dir}:z"));
        }
        mounts.insert(
            data_dir.join("config").display().to_string(),
            "/etc/coral/coral.conf:z".to_string(),
        );
        if t == "mirror" || t == "crash" {
            // these do not search for their keyrings in a data directory
            mounts.insert(
                data_dir.join("keyring").display().to_string(),
                format!("/etc/coral/coral.{}.keyring", self.auth_name()),
            );
        }

        if t == "mon" || t == "osd" {
            mounts.insert("/dev".into(), "/dev".into());
            mounts.insert("/run/udev".into(), "/run/udev".into());
        }
        if t == "osd" {
            mounts.insert("/sys".into(), "/sys".into());
            mounts.insert("/run/lvm".into(), "/run/lvm".into());
            mounts.insert("/run/lock/lvm".into(), "/run/lock/lvm".into());
        }

        mounts
    }

    fn daemon_args(&self) -> Vec<String> {
        if self.is_crash() {
            return Vec::new();
        }
        let mut args: Vec<String> = vec![
            "--setuser".into(),
            "coral".into(),
            "--setgroup".into(),
            "coral".into(),
            "--default-log-to-file=false".into(),
            "--default-log-to-stderr=true".into(),
            "--default-log-stderr-prefix=\"debug \"".into(),
        ];
        if self.name.daemon_type == "mon" {
            args.push("--default-mon-cluster-log-to-file=false".into());
            args.push("--default-mon-cluster-log-to-stderr=true".into());
        }
        args
    }

    fn materialize_files(&self, data_dir: &Path, owner: Owner) -> Result<()> {
        if let Some(ref config) = self.config {
            fsutil::write_atomic(&data_dir.join("config"), config, 0o600, Some(owner))?;
        }
        if let Some(ref keyring) = self.keyring {
            fsutil::write_atomic(&data_dir.join("keyring"), keyring, 0o600, Some(owner))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSID: &str = "11111111-1111-1111-1111-111111111111";

    fn mgr() -> CoreDaemon {
        CoreDaemon::init(FSID, DaemonName::new("mgr", "a"), ConfigBlob::default(), "img").unwrap()
    }

    #[test]
    fn test_validate_rejects_bad_fsid() {
        let d = CoreDaemon::init(
            "nope",
            DaemonName::new("mgr", "a"),
            ConfigBlob::default(),
            "img",
        )
        .unwrap();
        assert!(d.validate().is_err());
        assert!(mgr().validate().is_ok());
    }

    #[test]
    fn test_auth_names() {
        let d = mgr();
        assert_eq!(d.auth_name(), "mgr.a");
        let d = CoreDaemon::init(FSID, DaemonName::new("rgw", "a"), ConfigBlob::default(), "img")
            .unwrap();
        assert_eq!(d.auth_name(), "client.rgw.a");
        assert_eq!(d.entrypoint(), "/usr/bin/coral-rgw");
    }

    #[test]
    fn test_osd_mounts_include_devices() {
        let d = CoreDaemon::init(FSID, DaemonName::new("osd", "0"), ConfigBlob::default(), "img")
            .unwrap();
        let mounts = d.container_mounts(Path::new("/var/lib/coral/f/osd.0"));
        assert_eq!(mounts["/dev"], "/dev");
        assert_eq!(mounts["/sys"], "/sys");
        assert_eq!(mounts["/run/lvm"], "/run/lvm");
        assert!(d.privileged());
    }

    #[test]
    fn test_mgr_mounts_map_config() {
        let mounts = mgr().container_mounts(Path::new("/var/lib/coral/f/mgr.a"));
        assert_eq!(
            mounts["/var/lib/coral/f/mgr.a/config"],
            "/etc/coral/coral.conf:z"
        );
        assert_eq!(mounts["/var/lib/coral/f/mgr.a"], "/var/lib/coral/mgr/coral-a:z");
        assert!(!mgr().privileged());
    }

    #[test]
    fn test_mon_gets_cluster_log_args() {
        let d = CoreDaemon::init(FSID, DaemonName::new("mon", "a"), ConfigBlob::default(), "img")
            .unwrap();
        let args = d.daemon_args();
        assert!(args.contains(&"--default-mon-cluster-log-to-stderr=true".to_string()));
        assert!(!mgr()
            .daemon_args()
            .contains(&"--default-mon-cluster-log-to-stderr=true".to_string()));
    }

    #[test]
    fn test_materialize_writes_config_and_keyring() {
        let dir = tempfile::tempdir().unwrap();
        let blob = ConfigBlob::parse(r#"{"config": "[global]\n", "keyring": "[mgr.a]\nkey = x\n"}"#)
            .unwrap();
        let d = CoreDaemon::init(FSID, DaemonName::new("mgr", "a"), blob, "img").unwrap();
        let owner = Owner::new(unsafe { libc::getuid() }, unsafe { libc::getgid() });
        d.materialize_files(dir.path(), owner).unwrap();

        use std::os::unix::fs::PermissionsExt;
        let config = dir.path().join("config");
        assert_eq!(std::fs::read_to_string(&config).unwrap(), "[global]\n");
        let mode = std::fs::metadata(&config).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(dir.path().join("keyring").exists());
    }

    #[test]
    fn test_activate_container_needs_osd_fsid() {
        let d = CoreDaemon::init(FSID, DaemonName::new("osd", "0"), ConfigBlob::default(), "img")
            .unwrap();
        assert!(d.activate_container(Path::new("/x")).is_none());

        let blob = ConfigBlob::parse(r#"{"osd_fsid": "22222222-2222-2222-2222-222222222222"}"#)
            .unwrap();
        let d = CoreDaemon::init(FSID, DaemonName::new("osd", "0"), blob, "img").unwrap();
        let c = d.activate_container(Path::new("/x")).unwrap();
        assert_eq!(c.entrypoint.as_deref(), Some("/usr/sbin/coral-volume"));
        assert!(c.privileged);
        assert_eq!(c.cname, format!("coral-{FSID}-osd.0-activate"));
    }
}
