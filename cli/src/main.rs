// SPDX-License-Identifier: Apache-2.0

//! `blockade` — command line front-end for network-fault injection against
//! a topology of Docker containers. Every subcommand runs directly against
//! an embedded [`blockade_core::application::facade::ControllerFacade`];
//! `daemon` is the one subcommand that keeps that facade alive and puts a
//! REST surface in front of it instead of exiting after one operation.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Network-fault injection for container topologies.
#[derive(Debug, Parser)]
#[command(name = "blockade", version, about)]
struct Cli {
    /// Path to the topology config file. Defaults to ./blockade.yaml or
    /// ./blockade.yml in the current directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding persisted state and audit logs. Defaults to the
    /// current directory.
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,

    /// Name for this topology. Defaults to the data directory's base name.
    #[arg(long, global = true)]
    name: Option<String>,

    /// Log verbosity: error, warn, info, debug, trace. Overridden by RUST_LOG.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bring up every container declared in the config file.
    Up {
        /// If a container by the expected name already exists on the
        /// runtime (left over from a prior, uncleanly-torn-down run),
        /// force-remove it and retry that container's create once.
        #[arg(long)]
        force: bool,
    },
    /// Tear down the topology: stop and remove every container, restore
    /// the network, and remove persisted state.
    Destroy,
    /// Show the reconciled status of every container in the topology.
    Status {
        /// Print machine-readable JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Start stopped containers.
    Start(commands::lifecycle::Selection),
    /// Stop running containers.
    Stop(commands::lifecycle::Selection),
    /// Restart containers.
    Restart(commands::lifecycle::Selection),
    /// Kill containers with a signal (default SIGKILL).
    Kill {
        #[command(flatten)]
        selection: commands::lifecycle::Selection,
        #[arg(long, default_value = "SIGKILL")]
        signal: String,
    },
    /// Print a container's logs.
    Logs {
        container: String,
        #[arg(long)]
        tail: Option<u64>,
    },
    /// Introduce packet loss on the named containers' network.
    Flaky {
        #[command(flatten)]
        selection: commands::lifecycle::Selection,
        params: Option<String>,
    },
    /// Introduce latency on the named containers' network.
    Slow {
        #[command(flatten)]
        selection: commands::lifecycle::Selection,
        params: Option<String>,
    },
    /// Introduce packet duplication on the named containers' network.
    Duplicate {
        #[command(flatten)]
        selection: commands::lifecycle::Selection,
        params: Option<String>,
    },
    /// Restore normal network behavior for the named containers.
    Fast(commands::lifecycle::Selection),
    /// Partition containers into mutually-unreachable groups. Pass one
    /// `--group name1,name2` per group; containers not named in any group
    /// form their own leftover group. `--random` ignores `--group` and
    /// picks a random number of groups instead.
    Partition {
        #[arg(long = "group", conflicts_with = "random")]
        groups: Vec<String>,
        #[arg(long)]
        random: bool,
    },
    /// Clear all partitions, restoring full connectivity.
    Join,
    /// Adopt an externally-created container into this topology.
    Add { name: String, container: String },
    /// Print the audit log for this topology.
    Events,
    /// Manage a chaos session against this topology.
    Chaos {
        #[command(subcommand)]
        action: commands::chaos::ChaosAction,
    },
    /// Run the REST server in the foreground.
    Daemon {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 7890)]
        port: u16,
    },
    /// Print version information and exit.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match commands::dispatch(cli.command, cli.config, cli.data_dir, cli.name).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<blockade_core::domain::errors::BlockadeError>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}
