mod args;

use std::collections::HashMap;
use std::path::Path;

use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use coraladm::container::ContainerSpec;
use coraladm::context::Ctx;
use coraladm::daemon::{ConfigBlob, DaemonDescriptor, DaemonName};
use coraladm::{deploy, exec, hostenv, inventory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut ctx = Ctx::from_host()?;
    ctx.timeout = cli.timeout;
    ctx.container_init = cli.container_init;
    let image = cli
        .image
        .clone()
        .or_else(|| std::env::var("CORAL_IMAGE").ok())
        .unwrap_or_else(|| hostenv::DEFAULT_IMAGE.to_string());

    match cli.command {
        Commands::Deploy {
            name,
            fsid,
            config_json,
            reconfig,
            tcp_ports,
            allow_ptrace,
        } => {
            let name = DaemonName::parse(&name)?;
            let blob = read_config_json(&ctx, config_json.as_deref())?;
            let descriptor = DaemonDescriptor::new(&fsid, name, blob, &image)?;
            let opts = deploy::DeployOptions {
                reconfig,
                allow_ptrace,
                tcp_ports: parse_ports(tcp_ports.as_deref())?,
            };
            deploy::deploy(&ctx, &descriptor, &opts).await?;
        }
        Commands::Ls { no_detail } => {
            let ls = inventory::list_daemons(&ctx, !no_detail).await?;
            println!("{}", serde_json::to_string_pretty(&ls)?);
        }
        Commands::RmDaemon {
            name,
            fsid,
            force,
            force_delete_data,
        } => {
            let name = DaemonName::parse(&name)?;
            let opts = deploy::RemoveOptions {
                force,
                force_delete_data,
            };
            deploy::rm_daemon(&ctx, &fsid, &name, &opts).await?;
        }
        Commands::RmCluster { fsid, force } => {
            deploy::rm_cluster(&ctx, &fsid, force).await?;
        }
        Commands::Shell { fsid, args } => {
            let code = run_shell(&ctx, fsid.as_deref(), &image, &args).await?;
            std::process::exit(code);
        }
        Commands::Version => {
            let spec = ContainerSpec::new(&image)
                .entrypoint("coral")
                .args(["--version"]);
            let cmd = spec.run_cmd(&ctx);
            let argv: Vec<&str> = cmd.iter().map(String::as_str).collect();
            let res = exec::call_throws(&ctx, &argv, None).await?;
            println!("{}", res.stdout.trim());
        }
    }

    Ok(())
}

/// Resolve the `--config-json` argument: `-` reads stdin, a leading `{`
/// is inline JSON, anything else is a file path.
fn read_config_json(ctx: &Ctx, arg: Option<&str>) -> anyhow::Result<ConfigBlob> {
    let raw = match arg {
        None => return Ok(ConfigBlob::default()),
        Some("-") => ctx.read_stdin()?.to_string(),
        Some(s) if s.trim_start().starts_with('{') => s.to_string(),
        Some(path) => std::fs::read_to_string(path)?,
    };
    Ok(ConfigBlob::parse(&raw)?)
}

fn parse_ports(arg: Option<&str>) -> anyhow::Result<Vec<u16>> {
    arg.unwrap_or_default()
        .split_whitespace()
        .map(|p| p.parse::<u16>().map_err(|e| anyhow::anyhow!("bad port {p}: {e}")))
        .collect()
}

/// Interactive container shell, with the cluster's config and logs
/// mounted when an fsid is given.
async fn run_shell(ctx: &Ctx, fsid: Option<&str>, image: &str, args: &[String]) -> anyhow::Result<i32> {
    let mut mounts = HashMap::new();
    let host_conf = Path::new("/etc/coral/coral.conf");
    if host_conf.exists() {
        mounts.insert(
            host_conf.display().to_string(),
            "/etc/coral/coral.conf:z".to_string(),
        );
    }
    if let Some(fsid) = fsid {
        mounts.insert(
            ctx.log_dir.join(fsid).display().to_string(),
            "/var/log/coral:z".to_string(),
        );
    }

    let argv: Vec<String> = if args.is_empty() {
        vec!["bash".to_string()]
    } else {
        args.to_vec()
    };
    let spec = ContainerSpec::new(image)
        .privileged(true)
        .volume_mounts(mounts)
        .container_args(["-it".to_string()]);
    let cmd = spec.shell_cmd(ctx, &argv);
    let cmd_refs: Vec<&str> = cmd.iter().map(String::as_str).collect();
    Ok(exec::call_timeout(ctx, &cmd_refs, ctx.timeout).await?)
}
