//! NFS gateway daemon (ganesha-based).

use std::collections::HashMap;
use std::path::Path;

use crate::container::{container_name, ContainerSpec};
use crate::error::{Error, Result};
use crate::fsutil::{self, Owner};

use super::{require_files, validate_identity, ConfigBlob, DaemonName, Descriptor};

pub const ENTRYPOINT: &str = "/usr/bin/ganesha.nfsd";
pub const PORT: u16 = 2049;

const REQUIRED_FILES: &[&str] = &["ganesha.conf"];

/// Object-gateway integration: the NFS export can front the rgw, which
/// needs its own keyring on disk.
#[derive(Debug)]
pub struct RgwSpec {
    pub cluster: String,
    pub user: String,
    pub keyring: String,
}

#[derive(Debug)]
pub struct NfsGateway {
    fsid: String,
    name: DaemonName,
    image: String,
    /// Storage pool holding the grace db. Required.
    pub pool: String,
    pub namespace: Option<String>,
    pub userid: Option<String>,
    extra_args: Vec<String>,
    files: HashMap<String, String>,
    rgw: Option<RgwSpec>,
}

impl NfsGateway {
    pub fn init(fsid: &str, name: DaemonName, config: ConfigBlob, image: &str) -> Result<Self> {
        let rgw = config.get_object("rgw").map(|o| RgwSpec {
            cluster: str_or(o, "cluster", "coral"),
            user: str_or(o, "user", "admin"),
            keyring: str_or(o, "keyring", ""),
        });
        Ok(Self {
            fsid: fsid.to_string(),
            name,
            image: image.to_string(),
            pool: config.get_str("pool").unwrap_or_default(),
            namespace: config.get_str("namespace"),
            userid: config.get_str("userid"),
            extra_args: config.get_str_list("extra_args"),
            files: config.files(),
            rgw,
        })
    }

    /// One-shot container mutating the shared grace db; `action` is
    /// `add` or `remove`.
    pub fn rados_grace_container(&self, data_dir: &Path, action: &str) -> ContainerSpec {
        let mut args = vec!["--pool".to_string(), self.pool.clone()];
        if let Some(ref ns) = self.namespace {
            args.push("--ns".into());
            args.push(ns.clone());
        }
        if let Some(ref userid) = self.userid {
            args.push("--userid".into());
            args.push(userid.clone());
        }
        args.push(action.to_string());
        args.push(self.name.to_string());

        ContainerSpec::new(&self.image)
            .entrypoint("/usr/bin/ganesha-rados-grace")
            .args(args)
            .volume_mounts(self.container_mounts(data_dir))
            .envs(self.env_vars())
            .cname(container_name(
                &self.fsid,
                &self.name.to_string(),
                Some(&format!("grace-{action}")),
            ))
    }
}

fn str_or(map: &serde_json::Map<String, serde_json::Value>, key: &str, default: &str) -> String {
    map.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

impl Descriptor for NfsGateway {
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
        if self.pool.is_empty() {
            return Err(Error::validation("pool missing from config-json"));
        }
        require_files(&self.files, REQUIRED_FILES)?;
        if let Some(ref rgw) = self.rgw {
            if rgw.keyring.is_empty() {
                return Err(Error::validation("RGW keyring is missing"));
            }
            if rgw.user.is_empty() {
                return Err(Error::validation("RGW user is missing"));
            }
        }
        Ok(())
    }

    fn container_mounts(&self, data_dir: &Path) -> HashMap<String, String> {
        let mut mounts = HashMap::new();
        let d = |sub: &str| data_dir.join(sub).display().to_string();
        mounts.insert(d("config"), "/etc/coral/coral.conf:z".into());
        mounts.insert(d("keyring"), "/etc/coral/keyring:z".into());
        mounts.insert(d("etc/ganesha"), "/etc/ganesha:z".into());
        if let Some(ref rgw) = self.rgw {
            mounts.insert(
                d("keyring.rgw"),
                format!("/var/lib/coral/rgw/{}-{}/keyring:z", rgw.cluster, rgw.user),
            );
        }
        mounts
    }

    fn daemon_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-F".into(), "-L".into(), "STDERR".into()];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn env_vars(&self) -> Vec<String> {
        vec!["CORAL_CONF=/etc/coral/coral.conf".into()]
    }

    fn materialize_files(&self, data_dir: &Path, owner: Owner) -> Result<()> {
        let config_dir = data_dir.join("etc/ganesha");
        fsutil::makedirs(&config_dir, 0o755, Some(owner))?;

        for (fname, content) in &self.files {
            fsutil::write_atomic(&config_dir.join(fname), content, 0o600, Some(owner))?;
        }
        if let Some(ref rgw) = self.rgw {
            fsutil::write_atomic(
                &data_dir.join("keyring.rgw"),
                &rgw.keyring,
                0o600,
                Some(owner),
            )?;
        }
        Ok(())
    }

    fn default_ports(&self) -> Vec<u16> {
        vec![PORT]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSID: &str = "11111111-1111-1111-1111-111111111111";

    fn blob(json: &str) -> ConfigBlob {
        ConfigBlob::parse(json).unwrap()
    }

    fn gateway(json: &str) -> NfsGateway {
        NfsGateway::init(FSID, DaemonName::new("nfs", "a"), blob(json), "img").unwrap()
    }

    #[test]
    fn test_requires_pool_and_conf() {
        let d = gateway(r#"{"files": {"ganesha.conf": "EXPORT {}"}}"#);
        assert!(d.validate().unwrap_err().to_string().contains("pool"));

        let d = gateway(r#"{"pool": "nfs-ganesha"}"#);
        assert!(d
            .validate()
            .unwrap_err()
            .to_string()
            .contains("ganesha.conf"));

        let d = gateway(r#"{"pool": "nfs-ganesha", "files": {"ganesha.conf": "EXPORT {}"}}"#);
        assert!(d.validate().is_ok());
        assert_eq!(d.default_ports(), vec![2049]);
    }

    #[test]
    fn test_rgw_integration_requires_keyring() {
        let d = gateway(
            r#"{"pool": "p", "files": {"ganesha.conf": ""},
                "rgw": {"user": "admin"}}"#,
        );
        assert!(d.validate().unwrap_err().to_string().contains("keyring"));

        let d = gateway(
            r#"{"pool": "p", "files": {"ganesha.conf": ""},
                "rgw": {"user": "admin", "keyring": "[client.rgw]\nkey = x\n"}}"#,
        );
        assert!(d.validate().is_ok());
        let mounts = d.container_mounts(Path::new("/data"));
        assert_eq!(
            mounts["/data/keyring.rgw"],
            "/var/lib/coral/rgw/coral-admin/keyring:z"
        );
    }

    #[test]
    fn test_grace_container_args() {
        let d = gateway(
            r#"{"pool": "p", "namespace": "ns", "userid": "u",
                "files": {"ganesha.conf": ""}}"#,
        );
        let c = d.rados_grace_container(Path::new("/data"), "add");
        assert_eq!(c.entrypoint.as_deref(), Some("/usr/bin/ganesha-rados-grace"));
        assert_eq!(
            c.args,
            vec!["--pool", "p", "--ns", "ns", "--userid", "u", "add", "nfs.a"]
        );
        assert_eq!(c.cname, format!("coral-{FSID}-nfs.a-grace-add"));
    }

    #[test]
    fn test_materialize_writes_ganesha_tree() {
        let dir = tempfile::tempdir().unwrap();
        let d = gateway(
            r#"{"pool": "p", "files": {"ganesha.conf": "EXPORT {}\n"},
                "rgw": {"keyring": "[k]\n"}}"#,
        );
        let owner = Owner::new(unsafe { libc::getuid() }, unsafe { libc::getgid() });
        d.materialize_files(dir.path(), owner).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("etc/ganesha/ganesha.conf")).unwrap(),
            "EXPORT {}\n"
        );
        assert!(dir.path().join("keyring.rgw").exists());
    }
}
