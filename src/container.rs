//! Container invocation building.
//!
//! [`ContainerSpec`] is pure data; the command builders translate it into
//! argument vectors for the configured runtime. None of the builders can
//! fail: an empty image or name is a caller contract violation, guarded
//! by descriptor validation upstream.

use std::collections::HashMap;
use std::path::Path;

use crate::context::Ctx;

/// Everything needed to run one container. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub entrypoint: Option<String>,
    /// Positional args appended after the image.
    pub args: Vec<String>,
    /// host path -> container path; later inserts overwrite earlier ones.
    pub volume_mounts: HashMap<String, String>,
    /// Structured `--mount` option sets, e.g. `["type=bind", "source=..."]`.
    pub bind_mounts: Vec<Vec<String>>,
    /// `NAME=value` environment entries.
    pub envs: Vec<String>,
    /// Runtime-specific extra flags inserted before the env section.
    pub container_args: Vec<String>,
    pub cname: String,
    pub privileged: bool,
    pub ptrace: bool,
    pub init: bool,
    pub host_network: bool,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            host_network: true,
            ..Default::default()
        }
    }

    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        let e = entrypoint.into();
        if !e.is_empty() {
            self.entrypoint = Some(e);
        }
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn volume_mounts(mut self, mounts: HashMap<String, String>) -> Self {
        self.volume_mounts = mounts;
        self
    }

    pub fn bind_mounts(mut self, binds: Vec<Vec<String>>) -> Self {
        self.bind_mounts = binds;
        self
    }

    pub fn envs<I, S>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.envs = envs.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn container_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.container_args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn cname(mut self, cname: impl Into<String>) -> Self {
        self.cname = cname.into();
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn ptrace(mut self, ptrace: bool) -> Self {
        self.ptrace = ptrace;
        self
    }

    pub fn init(mut self, init: bool) -> Self {
        self.init = init;
        self
    }

    pub fn host_network(mut self, host_network: bool) -> Self {
        self.host_network = host_network;
        self
    }

    fn runtime(ctx: &Ctx) -> String {
        ctx.container_path.display().to_string()
    }

    fn env_args(&self) -> Vec<String> {
        let mut envs = vec![
            "-e".into(),
            format!("CONTAINER_IMAGE={}", self.image),
            "-e".into(),
            format!("NODE_NAME={}", node_name()),
        ];
        for env in &self.envs {
            envs.push("-e".into());
            envs.push(env.clone());
        }
        envs
    }

    fn volume_args(&self) -> Vec<String> {
        let mut vols = Vec::new();
        for (host, container) in &self.volume_mounts {
            vols.push("-v".into());
            vols.push(format!("{host}:{container}"));
        }
        vols
    }

    fn bind_args(&self) -> Vec<String> {
        let mut binds = Vec::new();
        for bind in &self.bind_mounts {
            binds.push("--mount".into());
            binds.push(bind.join(","));
        }
        binds
    }

    /// Full foreground `run` invocation.
    pub fn run_cmd(&self, ctx: &Ctx) -> Vec<String> {
        let mut cmd: Vec<String> = vec![
            Self::runtime(ctx),
            "run".into(),
            "--rm".into(),
            "--ipc=host".into(),
        ];
        if self.host_network {
            cmd.push("--net=host".into());
        }
        if let Some(ref entrypoint) = self.entrypoint {
            cmd.push("--entrypoint".into());
            cmd.push(entrypoint.clone());
        }
        if self.privileged {
            // let storage daemons read block devices that have not been
            // chowned yet
            cmd.push("--privileged".into());
            cmd.push("--group-add=disk".into());
        }
        if self.ptrace && !self.privileged {
            // privileged already grants SYS_PTRACE; --cap-add and
            // --privileged are mutually exclusive since podman >= 2.0
            cmd.push("--cap-add=SYS_PTRACE".into());
        }
        if self.init {
            cmd.push("--init".into());
        }
        if !self.cname.is_empty() {
            cmd.push("--name".into());
            cmd.push(self.cname.clone());
        }
        cmd.extend(self.container_args.iter().cloned());
        cmd.extend(self.env_args());
        cmd.extend(self.volume_args());
        cmd.extend(self.bind_args());
        cmd.push(self.image.clone());
        cmd.extend(self.args.iter().cloned());
        cmd
    }

    /// Interactive variant: same prefix, caller-supplied argv as the
    /// entrypoint.
    pub fn shell_cmd(&self, ctx: &Ctx, argv: &[String]) -> Vec<String> {
        let mut cmd: Vec<String> = vec![
            Self::runtime(ctx),
            "run".into(),
            "--rm".into(),
            "--ipc=host".into(),
        ];
        if self.host_network {
            cmd.push("--net=host".into());
        }
        if self.privileged {
            cmd.push("--privileged".into());
            cmd.push("--group-add=disk".into());
        }
        cmd.extend(self.container_args.iter().cloned());
        cmd.extend(self.env_args());
        cmd.extend(self.volume_args());
        cmd.extend(self.bind_args());
        cmd.push("--entrypoint".into());
        cmd.push(argv[0].clone());
        cmd.push(self.image.clone());
        cmd.extend(argv[1..].iter().cloned());
        cmd
    }

    /// Exec into the running container.
    pub fn exec_cmd(&self, ctx: &Ctx, argv: &[String]) -> Vec<String> {
        let mut cmd = vec![Self::runtime(ctx), "exec".into()];
        cmd.extend(self.container_args.iter().cloned());
        cmd.push(self.cname.clone());
        cmd.extend(argv.iter().cloned());
        cmd
    }

    pub fn stop_cmd(&self, ctx: &Ctx) -> Vec<String> {
        vec![Self::runtime(ctx), "stop".into(), self.cname.clone()]
    }

    /// Force-remove the container; `storage` adds podman's `--storage`
    /// fallback for containers the runtime no longer tracks.
    pub fn rm_cmd(&self, ctx: &Ctx, storage: bool) -> Vec<String> {
        let mut cmd = vec![Self::runtime(ctx), "rm".into(), "-f".into()];
        if storage {
            cmd.push("--storage".into());
        }
        cmd.push(self.cname.clone());
        cmd
    }
}

/// Container name for a daemon of a cluster: `coral-<fsid>-<type>.<id>`,
/// with an optional suffix for sidecar/one-shot containers.
pub fn container_name(fsid: &str, daemon_name: &str, desc: Option<&str>) -> String {
    match desc {
        Some(d) => format!("coral-{fsid}-{daemon_name}-{d}"),
        None => format!("coral-{fsid}-{daemon_name}"),
    }
}

fn node_name() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Join a mount source to the data dir unless it is already absolute.
pub fn resolve_mount_source(data_dir: &Path, source: &str) -> String {
    if source.starts_with('/') {
        source.to_string()
    } else {
        data_dir.join(source).display().to_string()
    }
}
