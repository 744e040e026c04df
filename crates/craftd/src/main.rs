//! craftd: the CraftGrid daemon.
//!
//! One binary, three roles:
//! - `control-plane`: node registry, server orchestration, RPC surface and
//!   the reconciliation loops
//! - `agent`: registers a worker node and heartbeats to the coordinator
//! - `server`: one-shot client for server lifecycle RPCs
//!
//! # Usage
//!
//! ```text
//! craftd --config craftgrid.toml control-plane --listen 0.0.0.0:50051
//! craftd agent --coordinator http://10.0.0.1:50051 --node-id node-a
//! craftd server --node-id node-a --api-key key-... provision srv1 1.20
//! ```

mod agent_mode;
mod client;
mod control_plane;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use craft_core::CraftConfig;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "craftd", about = "CraftGrid daemon")]
struct Cli {
    /// Path to craftgrid.toml. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator.
    ControlPlane {
        /// Address the RPC surface listens on.
        #[arg(long)]
        listen: Option<String>,

        /// Directory holding one sub-directory per server.
        #[arg(long)]
        servers_dir: Option<PathBuf>,

        /// Artifact source (http(s)://base or file:///dir).
        #[arg(long)]
        artifact_source: Option<String>,

        /// Management API base URL.
        #[arg(long)]
        management_url: Option<String>,

        /// Disable pushes to the management API.
        #[arg(long)]
        no_management: bool,
    },

    /// Run the node agent on a worker host.
    Agent {
        /// Coordinator base URL.
        #[arg(long)]
        coordinator: Option<String>,

        /// Node id; defaults to the hostname.
        #[arg(long)]
        node_id: Option<String>,

        /// File the issued credential is cached in.
        #[arg(long)]
        credentials: Option<PathBuf>,
    },

    /// Drive server lifecycle RPCs against a coordinator.
    Server(client::ServerArgs),

    /// Print the effective configuration as TOML.
    Config,
}

impl Command {
    /// Fold CLI flags over the file configuration.
    fn apply(&self, config: &mut CraftConfig) {
        match self {
            Command::ControlPlane {
                listen,
                servers_dir,
                artifact_source,
                management_url,
                no_management,
            } => {
                if let Some(listen) = listen {
                    config.coordinator.listen = listen.clone();
                }
                if let Some(dir) = servers_dir {
                    config.coordinator.servers_dir = dir.clone();
                }
                if let Some(source) = artifact_source {
                    config.artifacts.source = source.clone();
                }
                if let Some(url) = management_url {
                    config.management.base_url = url.clone();
                }
                if *no_management {
                    config.management.enabled = false;
                }
            }
            Command::Agent {
                coordinator,
                node_id,
                credentials,
            } => {
                if let Some(url) = coordinator {
                    config.agent.coordinator_url = url.clone();
                }
                if let Some(id) = node_id {
                    config.agent.node_id = Some(id.clone());
                }
                if let Some(path) = credentials {
                    config.agent.credentials_path = path.clone();
                }
            }
            Command::Server(_) | Command::Config => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,craftd=debug,craftgrid=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = CraftConfig::load(cli.config.as_deref())?;
    cli.command.apply(&mut config);

    match cli.command {
        Command::ControlPlane { .. } => control_plane::run_control_plane(config).await,
        Command::Agent { .. } => agent_mode::run_agent(config.agent).await,
        Command::Server(args) => client::run(&config.agent, args).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Resolves once Ctrl-C is received. If the handler cannot be installed
/// the daemon keeps running.
pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
