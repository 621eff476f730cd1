//! Monitoring stack daemons: prometheus, node-exporter, grafana,
//! alertmanager. Each member is described by a static component table
//! entry; the descriptor itself only carries the config blob.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::fsutil::{self, Owner};

use super::{require_files, validate_identity, ConfigBlob, DaemonName, Descriptor};

#[derive(Debug)]
pub struct Component {
    pub default_image: &'static str,
    /// Fixed daemon args for the component binary.
    pub args: &'static [&'static str],
    /// Files that must be present in the config blob's `files` map.
    pub required_files: &'static [&'static str],
    /// Top-level config blob keys that must be present.
    pub required_args: &'static [&'static str],
    pub ports: &'static [u16],
    /// Config directory below the data dir, empty if the component has
    /// no config tree.
    pub config_dir: &'static str,
    /// uid/gid the upstream image runs as.
    pub uid: u32,
    pub gid: u32,
}

pub fn component(daemon_type: &str) -> Option<&'static Component> {
    match daemon_type {
        // 9095 rather than the upstream default 9090, which collides
        // with the cockpit UI
        "prometheus" => Some(&Component {
            default_image: "docker.io/prom/prometheus:v2.18.1",
            args: &[
                "--config.file=/etc/prometheus/prometheus.yml",
                "--storage.tsdb.path=/prometheus",
                "--web.listen-address=:9095",
            ],
            required_files: &["prometheus.yml"],
            required_args: &[],
            ports: &[9095],
            config_dir: "etc/prometheus",
            uid: 65534,
            gid: 65534,
        }),
        "node-exporter" => Some(&Component {
            default_image: "docker.io/prom/node-exporter:v0.18.1",
            args: &["--no-collector.timex"],
            required_files: &[],
            required_args: &[],
            ports: &[9100],
            config_dir: "",
            uid: 65534,
            gid: 65534,
        }),
        "grafana" => Some(&Component {
            default_image: "docker.io/coral/coral-grafana:6.6.2",
            args: &[],
            required_files: &[
                "grafana.ini",
                "provisioning/datasources/coral-dashboard.yml",
                "certs/cert_file",
                "certs/cert_key",
            ],
            required_args: &[],
            ports: &[3000],
            config_dir: "etc/grafana",
            uid: 472,
            gid: 472,
        }),
        "alertmanager" => Some(&Component {
            default_image: "docker.io/prom/alertmanager:v0.20.0",
            args: &[
                "--web.listen-address=:9093",
                "--cluster.listen-address=:9094",
            ],
            required_files: &["alertmanager.yml"],
            required_args: &["peers"],
            ports: &[9093, 9094],
            config_dir: "etc/alertmanager",
            uid: 65534,
            gid: 65534,
        }),
        _ => None,
    }
}

#[derive(Debug)]
pub struct MonitoringDaemon {
    fsid: String,
    name: DaemonName,
    image: String,
    files: HashMap<String, String>,
    peers: Vec<String>,
    has_peers_key: bool,
    comp: &'static Component,
}

impl MonitoringDaemon {
    pub fn init(fsid: &str, name: DaemonName, config: ConfigBlob, image: &str) -> Result<Self> {
        let comp = component(&name.daemon_type).ok_or_else(|| {
            Error::validation(format!("unknown monitoring daemon: {}", name.daemon_type))
        })?;
        let image = if image.is_empty() {
            comp.default_image.to_string()
        } else {
            image.to_string()
        };
        Ok(Self {
            fsid: fsid.to_string(),
            name,
            image,
            files: config.files(),
            peers: config.get_str_list("peers"),
            has_peers_key: config.has_key("peers"),
            comp,
        })
    }

    pub fn uid_gid(&self) -> (u32, u32) {
        (self.comp.uid, self.comp.gid)
    }

    /// Runtime flags making the container run as the component user.
    pub fn extra_container_args(&self) -> Vec<String> {
        vec!["--user".into(), self.comp.uid.to_string()]
    }
}

impl Descriptor for MonitoringDaemon {
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
        require_files(&self.files, self.comp.required_files)?;
        for key in self.comp.required_args {
            if *key == "peers" && !self.has_peers_key {
                return Err(Error::validation(format!(
                    "{} deployment requires config-json which must contain arg for {}",
                    self.name.daemon_type, key
                )));
            }
        }
        Ok(())
    }

    fn container_mounts(&self, data_dir: &Path) -> HashMap<String, String> {
        let mut mounts = HashMap::new();
        let d = |sub: &str| data_dir.join(sub).display().to_string();
        match self.name.daemon_type.as_str() {
            "prometheus" => {
                mounts.insert(d("etc/prometheus"), "/etc/prometheus:Z".into());
                mounts.insert(d("data"), "/prometheus:Z".into());
            }
            "node-exporter" => {
                mounts.insert("/proc".into(), "/host/proc:ro".into());
                mounts.insert("/sys".into(), "/host/sys:ro".into());
                mounts.insert("/".into(), "/rootfs:ro".into());
            }
            "grafana" => {
                mounts.insert(
                    d("etc/grafana/grafana.ini"),
                    "/etc/grafana/grafana.ini:Z".into(),
                );
                mounts.insert(
                    d("etc/grafana/provisioning/datasources"),
                    "/etc/grafana/provisioning/datasources:Z".into(),
                );
                mounts.insert(d("etc/grafana/certs"), "/etc/grafana/certs:Z".into());
            }
            "alertmanager" => {
                mounts.insert(d("etc/alertmanager"), "/etc/alertmanager:Z".into());
            }
            _ => {}
        }
        mounts
    }

    fn daemon_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.comp.args.iter().map(|s| s.to_string()).collect();
        if self.name.daemon_type == "alertmanager" {
            for peer in &self.peers {
                args.push(format!("--cluster.peer={peer}"));
            }
            // some alertmanager builds look elsewhere for their config
            args.push("--config.file=/etc/alertmanager/alertmanager.yml".into());
        }
        args
    }

    fn materialize_files(&self, data_dir: &Path, owner: Owner) -> Result<()> {
        let subdirs: &[&str] = match self.name.daemon_type.as_str() {
            "prometheus" => &["etc/prometheus", "etc/prometheus/alerting", "data"],
            "grafana" => &[
                "etc/grafana",
                "etc/grafana/certs",
                "etc/grafana/provisioning/datasources",
                "data",
            ],
            "alertmanager" => &["etc/alertmanager", "etc/alertmanager/data"],
            _ => &[],
        };
        for sub in subdirs {
            fsutil::makedirs(&data_dir.join(sub), 0o755, Some(owner))?;
        }

        for fname in self.comp.required_files {
            if let Some(content) = self.files.get(*fname) {
                let path = data_dir.join(self.comp.config_dir).join(fname);
                if let Some(parent) = path.parent() {
                    fsutil::makedirs(parent, 0o755, Some(owner))?;
                }
                fsutil::write_atomic(&path, content, 0o600, Some(owner))?;
            }
        }
        Ok(())
    }

    fn default_ports(&self) -> Vec<u16> {
        self.comp.ports.to_vec()
    }
}
