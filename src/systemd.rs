//! systemd unit management.
//!
//! Daemons run under a per-cluster templated service `coral-<fsid>@.service`
//! whose instance name is `<type>.<id>`. The exporter is a plain host
//! process with its own non-templated unit. All units hang off
//! `coral-<fsid>.target`, which itself is part of the global `coral.target`.

use std::fmt;

use tracing::{info, warn};

use crate::context::Ctx;
use crate::daemon::{DaemonName, EXPORTER_TYPE};
use crate::error::Result;
use crate::exec::{call, call_throws};
use crate::fsutil;

/// Instance unit name for a daemon, without the `.service` suffix.
pub fn unit_name(fsid: &str, name: &DaemonName) -> String {
    if name.daemon_type == EXPORTER_TYPE {
        format!("coral-{fsid}-{name}")
    } else {
        format!("coral-{fsid}@{name}")
    }
}

/// File name of the templated service definition for a cluster.
pub fn template_unit_name(fsid: &str) -> String {
    format!("coral-{fsid}@.service")
}

pub fn cluster_target_name(fsid: &str) -> String {
    format!("coral-{fsid}.target")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Running,
    Stopped,
    Error,
    Unknown,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

pub struct UnitStatus {
    pub enabled: bool,
    pub installed: bool,
    pub state: UnitState,
}

/// Probe a unit's enabled/active state. systemctl's exit codes vary with
/// the service state, so only the string output is inspected; probe
/// failures degrade to unknown rather than erroring out.
pub async fn check_unit(ctx: &Ctx, unit: &str) -> UnitStatus {
    let mut enabled = false;
    let mut installed = false;
    match call(ctx, &["systemctl", "is-enabled", unit], None).await {
        Ok(res) => {
            if res.success() {
                enabled = true;
                installed = true;
            } else if res.stdout.contains("disabled") {
                installed = true;
            }
        }
        Err(e) => warn!("unable to run systemctl: {}", e),
    }

    let state = match call(ctx, &["systemctl", "is-active", unit], None).await {
        Ok(res) => match res.stdout.trim() {
            "active" => UnitState::Running,
            "inactive" => UnitState::Stopped,
            "failed" | "auto-restart" => UnitState::Error,
            _ => UnitState::Unknown,
        },
        Err(e) => {
            warn!("unable to run systemctl: {}", e);
            UnitState::Unknown
        }
    };

    UnitStatus {
        enabled,
        installed,
        state,
    }
}

pub async fn enable(ctx: &Ctx, unit: &str) -> Result<()> {
    call_throws(ctx, &["systemctl", "enable", unit], None).await?;
    Ok(())
}

pub async fn disable(ctx: &Ctx, unit: &str) -> Result<()> {
    call_throws(ctx, &["systemctl", "disable", unit], None).await?;
    Ok(())
}

pub async fn start(ctx: &Ctx, unit: &str) -> Result<()> {
    call_throws(ctx, &["systemctl", "start", unit], None).await?;
    Ok(())
}

pub async fn stop(ctx: &Ctx, unit: &str) -> Result<()> {
    call_throws(ctx, &["systemctl", "stop", unit], None).await?;
    Ok(())
}

/// Best-effort; a unit that was never loaded makes this fail, which is
/// fine before a fresh deploy.
pub async fn reset_failed(ctx: &Ctx, unit: &str) {
    let _ = call(ctx, &["systemctl", "reset-failed", unit], None).await;
}

pub async fn daemon_reload(ctx: &Ctx) -> Result<()> {
    call_throws(ctx, &["systemctl", "daemon-reload"], None).await?;
    Ok(())
}

/// Templated service file body for one cluster.
pub fn unit_file(ctx: &Ctx, fsid: &str) -> String {
    let container_path = ctx.container_path.display();
    let data_dir = ctx.data_dir.display();
    // podman detaches; track it through conmon's pidfile so systemd can
    // supervise with Type=forking
    let extra_args = if ctx.uses_podman() {
        "ExecStartPre=-/bin/rm -f /%t/%n-pid /%t/%n-cid\n\
         ExecStopPost=-/bin/rm -f /%t/%n-pid /%t/%n-cid\n\
         Type=forking\n\
         PIDFile=/%t/%n-pid\n"
    } else {
        ""
    };

    format!(
        "# generated by coraladm\n\
         [Unit]\n\
         Description=Coral %i for {fsid}\n\
         \n\
         After=network-online.target local-fs.target time-sync.target\n\
         Wants=network-online.target local-fs.target time-sync.target\n\
         \n\
         PartOf=coral-{fsid}.target\n\
         Before=coral-{fsid}.target\n\
         \n\
         [Service]\n\
         LimitNOFILE=1048576\n\
         LimitNPROC=1048576\n\
         EnvironmentFile=-/etc/environment\n\
         ExecStartPre=-{container_path} rm coral-{fsid}-%i\n\
         ExecStart=/bin/bash {data_dir}/{fsid}/%i/unit.run\n\
         ExecStop=-{container_path} stop coral-{fsid}-%i\n\
         ExecStopPost=-/bin/bash {data_dir}/{fsid}/%i/unit.poststop\n\
         KillMode=none\n\
         Restart=on-failure\n\
         RestartSec=10s\n\
         TimeoutStartSec=120\n\
         TimeoutStopSec=120\n\
         StartLimitInterval=30min\n\
         StartLimitBurst=5\n\
         {extra_args}\
         [Install]\n\
         WantedBy=coral-{fsid}.target\n"
    )
}

/// Non-templated unit for the host exporter process.
pub fn exporter_unit_file(fsid: &str, daemon_dir: &str) -> String {
    format!(
        "# generated by coraladm\n\
         [Unit]\n\
         Description=coral host exporter for cluster {fsid}\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         PartOf=coral-{fsid}.target\n\
         Before=coral-{fsid}.target\n\
         \n\
         [Service]\n\
         Type=forking\n\
         ExecStart=/bin/bash {daemon_dir}/unit.run\n\
         ExecReload=/bin/kill -HUP $MAINPID\n\
         Restart=on-failure\n\
         RestartSec=10s\n\
         \n\
         [Install]\n\
         WantedBy=coral-{fsid}.target\n"
    )
}

/// Install the global and per-cluster targets plus the cluster's
/// logrotate config. Targets are rewritten every time but only enabled
/// and started on first installation.
pub async fn install_base_units(ctx: &Ctx, fsid: &str) -> Result<()> {
    let global = ctx.unit_dir.join("coral.target");
    let existed = global.exists();
    fsutil::write_atomic(
        &global,
        "[Unit]\n\
         Description=All Coral clusters and services\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        0o644,
        None,
    )?;
    if !existed {
        // disable first in case a unit of the same name from a distro
        // package is already enabled under /lib/systemd
        let _ = call(ctx, &["systemctl", "disable", "coral.target"], None).await;
        call_throws(ctx, &["systemctl", "enable", "coral.target"], None).await?;
        call_throws(ctx, &["systemctl", "start", "coral.target"], None).await?;
        info!("Enabled and started coral.target");
    }

    let target_name = cluster_target_name(fsid);
    let cluster = ctx.unit_dir.join(&target_name);
    let existed = cluster.exists();
    fsutil::write_atomic(
        &cluster,
        &format!(
            "[Unit]\n\
             Description=Coral cluster {fsid}\n\
             PartOf=coral.target\n\
             Before=coral.target\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target coral.target\n"
        ),
        0o644,
        None,
    )?;
    if !existed {
        call_throws(ctx, &["systemctl", "enable", &target_name], None).await?;
        call_throws(ctx, &["systemctl", "start", &target_name], None).await?;
        info!("Enabled and started {}", target_name);
    }

    // SIGHUP via killall touches daemons of every cluster in every
    // container; signalling just this cluster's daemons is not possible
    // from the host, and the extra signal is harmless
    fsutil::write_atomic(
        &ctx.logrotate_dir.join(format!("coral-{fsid}")),
        &format!(
            "# created by coraladm\n\
             /var/log/coral/{fsid}/*.log {{\n    \
             rotate 7\n    \
             daily\n    \
             compress\n    \
             sharedscripts\n    \
             postrotate\n        \
             killall -q -1 coral-mon coral-mgr coral-mds coral-osd coral-rgw coral-mirror || pkill -1 -x \"coral-mon|coral-mgr|coral-mds|coral-osd|coral-rgw|coral-mirror\" || true\n    \
             endscript\n    \
             missingok\n    \
             notifempty\n    \
             su root root\n\
             }}\n"
        ),
        0o644,
        None,
    )?;

    Ok(())
}
