//! Host daemon inventory.
//!
//! Walks the data root for both the legacy flat layout
//! (`<type>/<cluster>-<id>/`) and the current per-cluster layout
//! (`<fsid>/<type>.<id>/`), then optionally enriches each entry with
//! systemd state, runtime inspect data and a daemon version. Probe
//! failures never abort the listing; the affected fields stay empty.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::container::container_name;
use crate::context::Ctx;
use crate::daemon::{is_fsid, CORE_TYPES, CUSTOM_TYPE, ISCSI_TYPE, NFS_TYPE};
use crate::error::Result;
use crate::exec::call;
use crate::fsutil;
use crate::systemd;

const LEGACY_TYPES: &[&str] = &["mon", "osd", "mds", "mgr"];

/// One inventory row. Detail fields are `None` in a shallow listing.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonEntry {
    pub style: String,
    pub name: String,
    /// `None` when a legacy daemon's cluster config could not be read.
    #[serde(serialize_with = "fsid_or_unknown")]
    pub fsid: Option<String>,
    pub systemd_unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_image_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configured: Option<String>,
}

fn fsid_or_unknown<S: serde::Serializer>(v: &Option<String>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(v.as_deref().unwrap_or("unknown"))
}

impl DaemonEntry {
    fn new(style: &str, name: String, fsid: Option<String>, systemd_unit: String) -> Self {
        Self {
            style: style.to_string(),
            name,
            fsid,
            systemd_unit,
            enabled: None,
            state: None,
            container_id: None,
            container_image_name: None,
            container_image_id: None,
            version: None,
            started: None,
            created: None,
            deployed: None,
            configured: None,
        }
    }
}

/// List every daemon the data root knows about. With `detail`, probe
/// systemd and the container runtime per entry.
pub async fn list_daemons(ctx: &Ctx, detail: bool) -> Result<Vec<DaemonEntry>> {
    let mut ls = Vec::new();
    if !ctx.data_dir.exists() {
        return Ok(ls);
    }

    // versions already resolved in this scan, keyed by image id
    let mut seen_versions: HashMap<String, String> = HashMap::new();

    let mut top: Vec<_> = std::fs::read_dir(&ctx.data_dir)?
        .filter_map(|e| e.ok())
        .collect();
    top.sort_by_key(|e| e.file_name());

    for entry in top {
        let dirname = entry.file_name().to_string_lossy().into_owned();
        if LEGACY_TYPES.contains(&dirname.as_str()) {
            list_legacy(ctx, &entry.path(), &dirname, detail, &mut ls).await;
        } else if is_fsid(&dirname) {
            list_cluster(ctx, &entry.path(), &dirname, detail, &mut seen_versions, &mut ls).await;
        }
    }
    Ok(ls)
}

async fn list_legacy(
    ctx: &Ctx,
    type_dir: &Path,
    daemon_type: &str,
    detail: bool,
    ls: &mut Vec<DaemonEntry>,
) {
    let entries = match std::fs::read_dir(type_dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for sub in entries.filter_map(|e| e.ok()) {
        let dirname = sub.file_name().to_string_lossy().into_owned();
        let (cluster, daemon_id) = match dirname.split_once('-') {
            Some(pair) => pair,
            None => continue,
        };
        let fsid = legacy_daemon_fsid(&sub.path(), cluster, daemon_type);
        let unit = format!("coral-{daemon_type}@{daemon_id}");
        let mut entry = DaemonEntry::new(
            "legacy",
            format!("{daemon_type}.{daemon_id}"),
            fsid,
            unit.clone(),
        );
        if detail {
            let status = systemd::check_unit(ctx, &unit).await;
            entry.enabled = Some(status.enabled);
            entry.state = Some(status.state.to_string());
        }
        ls.push(entry);
    }
}

/// Cluster id of a legacy daemon: osds carry it in a `coral_fsid` file,
/// everything else falls back to the cluster's host config.
fn legacy_daemon_fsid(daemon_dir: &Path, cluster: &str, daemon_type: &str) -> Option<String> {
    if daemon_type == "osd" {
        if let Ok(fsid) = std::fs::read_to_string(daemon_dir.join("coral_fsid")) {
            let fsid = fsid.trim().to_string();
            if !fsid.is_empty() {
                return Some(fsid);
            }
        }
    }
    let config = std::fs::read_to_string(format!("/etc/coral/{cluster}.conf")).ok()?;
    for line in config.lines() {
        let line = line.trim();
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "fsid" {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

async fn list_cluster(
    ctx: &Ctx,
    cluster_dir: &Path,
    fsid: &str,
    detail: bool,
    seen_versions: &mut HashMap<String, String>,
    ls: &mut Vec<DaemonEntry>,
) {
    let entries = match std::fs::read_dir(cluster_dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains('.'))
        .collect();
    names.sort();

    for name in names {
        let (daemon_type, daemon_id) = match name.split_once('.') {
            Some(pair) => pair,
            None => continue,
        };
        let unit = systemd::unit_name(
            fsid,
            &crate::daemon::DaemonName::new(daemon_type, daemon_id),
        );
        let mut entry =
            DaemonEntry::new("coral:v1", name.clone(), Some(fsid.to_string()), unit.clone());
        if detail {
            let status = systemd::check_unit(ctx, &unit).await;
            entry.enabled = Some(status.enabled);
            entry.state = Some(status.state.to_string());
            fill_container_detail(ctx, fsid, &name, daemon_type, seen_versions, &mut entry).await;

            let daemon_dir = cluster_dir.join(&name);
            entry.created = fsutil::file_timestamp(&daemon_dir.join("unit.created"));
            entry.deployed = fsutil::file_timestamp(&daemon_dir.join("unit.image"));
            entry.configured = fsutil::file_timestamp(&daemon_dir.join("unit.configured"));
        }
        ls.push(entry);
    }
}

async fn fill_container_detail(
    ctx: &Ctx,
    fsid: &str,
    name: &str,
    daemon_type: &str,
    seen_versions: &mut HashMap<String, String>,
    entry: &mut DaemonEntry,
) {
    let cname = container_name(fsid, name, None);
    let runtime = ctx.container_path.display().to_string();
    let format =
        "{{.Id}},{{.Config.Image}},{{.Image}},{{.Created}},{{index .Config.Labels \"io.coral.version\"}}";
    let inspect = match call(
        ctx,
        &[&runtime, "inspect", "--format", format, &cname],
        None,
    )
    .await
    {
        Ok(res) if res.success() => res.stdout.trim().to_string(),
        _ => {
            // not running; at least report the deployed image
            let vfile = ctx.data_dir.join(fsid).join(name).join("unit.image");
            if let Ok(image) = std::fs::read_to_string(vfile) {
                let image = image.trim();
                if !image.is_empty() {
                    entry.container_image_name = Some(image.to_string());
                }
            }
            return;
        }
    };

    let fields: Vec<&str> = inspect.splitn(5, ',').collect();
    if fields.len() < 4 {
        warn!("unexpected inspect output for {}: {}", cname, inspect);
        return;
    }
    let container_id = fields[0].to_string();
    let image_id = normalize_container_id(fields[2]);
    entry.container_id = Some(container_id.clone());
    entry.container_image_name = Some(fields[1].to_string());
    entry.container_image_id = Some(image_id.clone());
    entry.started = Some(fields[3].to_string());

    let label_version = fields.get(4).map(|s| s.to_string()).unwrap_or_default();
    let mut version = if label_version.contains('.') {
        Some(label_version)
    } else {
        seen_versions.get(&image_id).cloned()
    };
    if version.is_none() {
        version = probe_version(ctx, &container_id, daemon_type).await;
        if let Some(ref v) = version {
            seen_versions.insert(image_id, v.clone());
        }
    }
    entry.version = version;
}

/// Ask the running container for its version, per daemon type. Custom
/// containers can hold anything, so no probe is attempted.
async fn probe_version(ctx: &Ctx, container_id: &str, daemon_type: &str) -> Option<String> {
    let runtime = ctx.container_path.display().to_string();

    if CORE_TYPES.contains(&daemon_type) {
        let res = call(ctx, &[&runtime, "exec", container_id, "coral", "-v"], None)
            .await
            .ok()?;
        if res.success() && res.stdout.starts_with("coral version ") {
            return res.stdout.split(' ').nth(2).map(|s| s.to_string());
        }
        return None;
    }
    match daemon_type {
        "grafana" => {
            let res = call(
                ctx,
                &[&runtime, "exec", container_id, "grafana-server", "-v"],
                None,
            )
            .await
            .ok()?;
            if res.success() && res.stdout.starts_with("Version ") {
                return res.stdout.split(' ').nth(1).map(|s| s.to_string());
            }
            None
        }
        "prometheus" | "alertmanager" | "node-exporter" => {
            let cmd = daemon_type.replace('-', "_");
            let res = call(ctx, &[&runtime, "exec", container_id, &cmd, "--version"], None)
                .await
                .ok()?;
            // these print the banner on stderr
            if res.success() && res.stderr.starts_with(&format!("{cmd}, version ")) {
                return res.stderr.split(' ').nth(2).map(|s| s.to_string());
            }
            None
        }
        t if t == NFS_TYPE => {
            let res = call(
                ctx,
                &[&runtime, "exec", container_id, "/usr/bin/ganesha.nfsd", "-v"],
                None,
            )
            .await
            .ok()?;
            if res.success() {
                return parse_ganesha_version(&res.stdout);
            }
            None
        }
        t if t == ISCSI_TYPE => {
            let res = call(
                ctx,
                &[&runtime, "exec", container_id, "rbd-target-api", "--version"],
                None,
            )
            .await
            .ok()?;
            if res.success() {
                let v = res.stdout.trim();
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
            None
        }
        t if t == CUSTOM_TYPE => None,
        _ => {
            warn!("version probe for unknown daemon type {}", daemon_type);
            None
        }
    }
}

/// `NFS-Ganesha Release = V3.3` -> `3.3`
fn parse_ganesha_version(out: &str) -> Option<String> {
    let idx = out.find("Release")?;
    let rest = out[idx..].split('=').nth(1)?.trim();
    let v: String = rest
        .trim_start_matches('V')
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

/// Both runtimes report sha256 image ids; docker prefixes the digest
/// algorithm, podman does not. Strip for consistency.
fn normalize_container_id(id: &str) -> String {
    id.strip_prefix("sha256:").unwrap_or(id).to_string()
}

/// Find one daemon's inventory entry by name.
pub async fn get_daemon_description(
    ctx: &Ctx,
    fsid: &str,
    name: &str,
    detail: bool,
) -> Result<DaemonEntry> {
    for d in list_daemons(ctx, detail).await? {
        if d.fsid.as_deref() == Some(fsid) && d.name == name {
            return Ok(d);
        }
    }
    Err(crate::error::Error::validation(format!(
        "daemon {name} not found in cluster {fsid}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const FSID: &str = "11111111-1111-1111-1111-111111111111";

    fn test_ctx(dir: &Path) -> Ctx {
        let mut ctx = Ctx::with_runtime(PathBuf::from("/no/such/runtime"));
        ctx.data_dir = dir.to_path_buf();
        ctx
    }

    #[tokio::test]
    async fn test_empty_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = test_ctx(&tmp.path().join("missing"));
        assert!(list_daemons(&ctx, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lists_current_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = test_ctx(tmp.path());
        for name in ["mon.a", "mgr.a", "osd.0"] {
            std::fs::create_dir_all(tmp.path().join(FSID).join(name)).unwrap();
        }
        // non-daemon dirs are skipped
        std::fs::create_dir_all(tmp.path().join(FSID).join("crash")).unwrap();
        std::fs::create_dir_all(tmp.path().join(FSID).join("removed")).unwrap();

        let ls = list_daemons(&ctx, false).await.unwrap();
        assert_eq!(ls.len(), 3);
        assert!(ls.iter().all(|d| d.style == "coral:v1"));
        assert!(ls.iter().all(|d| d.fsid.as_deref() == Some(FSID)));
        let names: Vec<&str> = ls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["mgr.a", "mon.a", "osd.0"]);
        assert_eq!(ls[0].systemd_unit, format!("coral-{FSID}@mgr.a"));
    }

    #[tokio::test]
    async fn test_lists_legacy_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = test_ctx(tmp.path());
        let osd_dir = tmp.path().join("osd/coral-3");
        std::fs::create_dir_all(&osd_dir).unwrap();
        std::fs::write(osd_dir.join("coral_fsid"), format!("{FSID}\n")).unwrap();
        // malformed names are skipped
        std::fs::create_dir_all(tmp.path().join("osd/junk")).unwrap();

        let ls = list_daemons(&ctx, false).await.unwrap();
        assert_eq!(ls.len(), 1);
        assert_eq!(ls[0].style, "legacy");
        assert_eq!(ls[0].name, "osd.3");
        assert_eq!(ls[0].fsid.as_deref(), Some(FSID));
        assert_eq!(ls[0].systemd_unit, "coral-osd@3");
    }

    #[tokio::test]
    async fn test_lists_mixed_layouts() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = test_ctx(tmp.path());
        let osd_dir = tmp.path().join("osd/coral-7");
        std::fs::create_dir_all(&osd_dir).unwrap();
        std::fs::write(osd_dir.join("coral_fsid"), format!("{FSID}\n")).unwrap();
        std::fs::create_dir_all(tmp.path().join(FSID).join("mgr.a")).unwrap();

        let ls = list_daemons(&ctx, false).await.unwrap();
        assert_eq!(ls.len(), 2);
        let legacy = ls.iter().find(|d| d.style == "legacy").unwrap();
        assert_eq!(legacy.name, "osd.7");
        let current = ls.iter().find(|d| d.style == "coral:v1").unwrap();
        assert_eq!(current.name, "mgr.a");
        assert_eq!(current.fsid.as_deref(), Some(FSID));
    }

    #[tokio::test]
    async fn test_detail_falls_back_to_unit_image() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = test_ctx(tmp.path());
        let dir = tmp.path().join(FSID).join("mgr.a");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("unit.image"), "docker.io/coral/daemon-base:latest\n").unwrap();
        std::fs::write(dir.join("unit.created"), "x\n").unwrap();

        let ls = list_daemons(&ctx, true).await.unwrap();
        assert_eq!(ls.len(), 1);
        assert_eq!(
            ls[0].container_image_name.as_deref(),
            Some("docker.io/coral/daemon-base:latest")
        );
        assert!(ls[0].container_id.is_none());
        assert!(ls[0].created.is_some());
    }

    #[tokio::test]
    async fn test_entry_serializes_unknown_fsid() {
        let entry = DaemonEntry::new("legacy", "mon.a".into(), None, "coral-mon@a".into());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["fsid"], "unknown");
        assert!(json.get("version").is_none());
    }

    #[test]
    fn test_normalize_container_id() {
        assert_eq!(normalize_container_id("sha256:abcd"), "abcd");
        assert_eq!(normalize_container_id("abcd"), "abcd");
    }

    #[test]
    fn test_parse_ganesha_version() {
        assert_eq!(
            parse_ganesha_version("NFS-Ganesha Release = V3.5\n").as_deref(),
            Some("3.5")
        );
        assert!(parse_ganesha_version("garbage").is_none());
    }

    #[tokio::test]
    async fn test_get_daemon_description_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = test_ctx(tmp.path());
        assert!(get_daemon_description(&ctx, FSID, "mon.a", false)
            .await
            .is_err());
    }
}
