use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coraladm")]
#[command(version)]
#[command(about = "Host-local agent for deploying and managing Coral cluster daemons", long_about = None)]
pub(crate) struct Cli {
    /// Container image to use. Can also be set via CORAL_IMAGE env var.
    #[arg(long, global = true)]
    pub image: Option<String>,

    /// Timeout in seconds for subprocess calls
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Pass --init to the container runtime
    #[arg(long, global = true)]
    pub container_init: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Deploy a daemon on the local host
    Deploy {
        /// Daemon name (<type>.<id>)
        #[arg(long)]
        name: String,

        /// Cluster id
        #[arg(long)]
        fsid: String,

        /// Configuration blob: inline JSON, a file path, or '-' for stdin
        #[arg(long)]
        config_json: Option<String>,

        /// Reconfigure an already deployed daemon in place
        #[arg(long)]
        reconfig: bool,

        /// Space-separated list of TCP ports the daemon requires
        #[arg(long)]
        tcp_ports: Option<String>,

        /// Allow attaching a debugger to the daemon process
        #[arg(long)]
        allow_ptrace: bool,
    },

    /// List daemons known to this host
    Ls {
        /// Skip systemd and container runtime probes
        #[arg(long)]
        no_detail: bool,
    },

    /// Remove a single daemon
    RmDaemon {
        /// Daemon name (<type>.<id>)
        #[arg(long)]
        name: String,

        /// Cluster id
        #[arg(long)]
        fsid: String,

        /// Proceed even for daemons holding precious data
        #[arg(long)]
        force: bool,

        /// Delete the data dir instead of backing it up
        #[arg(long)]
        force_delete_data: bool,
    },

    /// Remove every trace of a cluster from this host
    RmCluster {
        /// Cluster id
        #[arg(long)]
        fsid: String,

        /// Proceed even though this destroys data
        #[arg(long)]
        force: bool,
    },

    /// Run an interactive shell inside a daemon container image
    Shell {
        /// Cluster id (mounts the cluster's log dir when given)
        #[arg(long)]
        fsid: Option<String>,

        /// Command to run instead of bash
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print the daemon version of the container image
    Version,
}
