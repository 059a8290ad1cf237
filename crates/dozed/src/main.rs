//! dozed — the DozeGrid daemon.
//!
//! Single binary that assembles the DozeGrid subsystems:
//! - Job queue (local command log, or raft-replicated)
//! - Job service + leader-only jobs worker
//! - REST API
//!
//! # Usage
//!
//! ```text
//! dozed standalone --config dozed.toml
//! dozed cluster --config dozed.toml --node-id 2 --bootstrap
//! ```

mod cluster;
mod config;
mod daemon;
mod standalone;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

const DEFAULT_LOG_FILTER: &str = "info,dozed=debug,dozegrid=debug";

#[derive(Parser)]
#[command(name = "dozed", about = "DozeGrid daemon")]
struct Cli {
    /// Path to dozed.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single node with a local command log.
    Standalone {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run a raft-replicated node.
    Cluster {
        #[command(flatten)]
        common: CommonArgs,

        /// Raft node id.
        #[arg(long)]
        node_id: Option<u64>,

        /// Port serving raft RPCs.
        #[arg(long)]
        raft_port: Option<u16>,

        /// Initialize the cluster from the configured peers.
        #[arg(long)]
        bootstrap: bool,
    },
}

/// Flags overriding the config file in every mode.
#[derive(Args)]
struct CommonArgs {
    /// API port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for persistent state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON job templates file.
    #[arg(long)]
    jobs_config: Option<PathBuf>,

    /// Jobs worker interval in milliseconds.
    #[arg(long)]
    worker_interval_ms: Option<u64>,
}

impl CommonArgs {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(port) = self.port {
            config.api_port = port;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(path) = self.jobs_config {
            config.jobs_config = Some(path);
        }
        if let Some(ms) = self.worker_interval_ms {
            config.worker_interval_ms = ms;
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Standalone { common } => {
            common.apply(&mut config);
            let listener = daemon::bind_api(config.api_port).await?;
            standalone::run_standalone(config, listener, daemon::ctrl_c()).await
        }
        Command::Cluster {
            common,
            node_id,
            raft_port,
            bootstrap,
        } => {
            common.apply(&mut config);
            if let Some(id) = node_id {
                config.node_id = id;
            }
            if let Some(port) = raft_port {
                config.raft.port = port;
            }
            config.raft.bootstrap |= bootstrap;
            let listener = daemon::bind_api(config.api_port).await?;
            cluster::run_cluster(config, listener, daemon::ctrl_c()).await
        }
    }
}
