//! Free-form container daemon. The config blob carries the whole
//! runtime shape: entrypoint, mounts, envs, ports. Relative mount
//! sources are located below the daemon's data directory.

use std::collections::HashMap;
use std::path::Path;

use crate::container::resolve_mount_source;
use crate::error::Result;
use crate::fsutil::{self, Owner};

use super::{validate_identity, ConfigBlob, DaemonName, Descriptor};

#[derive(Debug)]
pub struct CustomContainer {
    fsid: String,
    name: DaemonName,
    image: String,
    pub entrypoint: Option<String>,
    pub uid: u32,
    pub gid: u32,
    volume_mounts: HashMap<String, String>,
    args: Vec<String>,
    envs: Vec<String>,
    pub privileged: bool,
    bind_mounts: Vec<Vec<String>>,
    ports: Vec<u16>,
    dirs: Vec<String>,
    files: HashMap<String, String>,
}

impl CustomContainer {
    pub fn init(fsid: &str, name: DaemonName, config: ConfigBlob, image: &str) -> Result<Self> {
        let volume_mounts = config
            .get_object("volume_mounts")
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let bind_mounts = config
            .get_object_list("bind_mounts")
            .unwrap_or_default();
        let ports = config
            .get_u64_list("ports")
            .into_iter()
            .filter_map(|p| u16::try_from(p).ok())
            .collect();
        Ok(Self {
            fsid: fsid.to_string(),
            name,
            image: image.to_string(),
            entrypoint: config.get_str("entrypoint"),
            uid: config.get_u64("uid").unwrap_or(65534) as u32,
            gid: config.get_u64("gid").unwrap_or(65534) as u32,
            volume_mounts,
            args: config.get_str_list("args"),
            envs: config.get_str_list("envs"),
            privileged: config.get_bool("privileged"),
            bind_mounts,
            ports,
            dirs: config.get_str_list("dirs"),
            files: config.files(),
        })
    }

    /// Raw runtime args appended to the container command line.
    pub fn container_args(&self) -> &[String] {
        &self.args
    }
}

impl Descriptor for CustomContainer {
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
        self.volume_mounts
            .iter()
            .map(|(source, destination)| {
                (
                    resolve_mount_source(data_dir, source),
                    destination.clone(),
                )
            })
            .collect()
    }

    fn daemon_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn env_vars(&self) -> Vec<String> {
        self.envs.clone()
    }

    fn container_binds(&self, data_dir: &Path) -> Vec<Vec<String>> {
        self.bind_mounts
            .iter()
            .map(|bind| {
                bind.iter()
                    .map(|opt| match opt.strip_prefix("source=") {
                        Some(source) => {
                            format!("source={}", resolve_mount_source(data_dir, source))
                        }
                        None => opt.clone(),
                    })
                    .collect()
            })
            .collect()
    }

    fn materialize_files(&self, data_dir: &Path, owner: Owner) -> Result<()> {
        for dir_path in &self.dirs {
            let path = data_dir.join(dir_path.trim_matches('/'));
            fsutil::makedirs(&path, 0o755, Some(owner))?;
        }
        for (file_path, content) in &self.files {
            let path = data_dir.join(file_path.trim_matches('/'));
            if let Some(parent) = path.parent() {
                fsutil::makedirs(parent, 0o755, Some(owner))?;
            }
            fsutil::write_atomic(&path, content, 0o600, Some(owner))?;
        }
        Ok(())
    }

    fn default_ports(&self) -> Vec<u16> {
        self.ports.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSID: &str = "11111111-1111-1111-1111-111111111111";

    fn custom(json: &str) -> CustomContainer {
        CustomContainer::init(
            FSID,
            DaemonName::new("container", "web"),
            ConfigBlob::parse(json).unwrap(),
            "img",
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let d = custom("{}");
        assert!(d.validate().is_ok());
        assert_eq!(d.uid, 65534);
        assert_eq!(d.gid, 65534);
        assert!(!d.privileged);
        assert!(d.entrypoint.is_none());
        assert!(d.default_ports().is_empty());
    }

    #[test]
    fn test_relative_mounts_land_below_data_dir() {
        let d = custom(
            r#"{"volume_mounts": {"/abs/conf": "/conf", "rel/conf": "/conf2"}}"#,
        );
        let mounts = d.container_mounts(Path::new("/data"));
        assert_eq!(mounts["/abs/conf"], "/conf");
        assert_eq!(mounts["/data/rel/conf"], "/conf2");
    }

    #[test]
    fn test_bind_sources_rewritten() {
        let d = custom(
            r#"{"bind_mounts": [["type=bind", "source=lib/modules",
                                 "destination=/lib/modules", "ro=true"]]}"#,
        );
        let binds = d.container_binds(Path::new("/data"));
        assert_eq!(
            binds[0],
            vec![
                "type=bind",
                "source=/data/lib/modules",
                "destination=/lib/modules",
                "ro=true"
            ]
        );
    }

    #[test]
    fn test_materialize_dirs_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let d = custom(
            r#"{"dirs": ["/etc/app"], "files": {"/etc/app/app.conf": "x=1\n"}}"#,
        );
        let owner = Owner::new(unsafe { libc::getuid() }, unsafe { libc::getgid() });
        d.materialize_files(dir.path(), owner).unwrap();
        assert!(dir.path().join("etc/app").is_dir());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("etc/app/app.conf")).unwrap(),
            "x=1\n"
        );
    }

    #[test]
    fn test_ports_and_envs() {
        let d = custom(r#"{"ports": [8080, 8443], "envs": ["A=1"]}"#);
        assert_eq!(d.default_ports(), vec![8080, 8443]);
        assert_eq!(d.env_vars(), vec!["A=1"]);
    }
}
