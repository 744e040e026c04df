//! `craftd server`: one-shot lifecycle RPCs.

use std::time::Duration;

use anyhow::bail;
use clap::{Args, Subcommand};
use craft_core::config::AgentConfig;
use craftgrid_cluster::rpc::{
    ProvisionServerRequest, ServerOperationRequest, UpdatePluginsRequest,
};
use craftgrid_cluster::RpcClient;
use craftgrid_state::Plugin;

#[derive(Args)]
pub struct ServerArgs {
    /// Coordinator base URL; defaults to the agent's configured one.
    #[arg(long)]
    coordinator: Option<String>,

    /// Node hosting the server.
    #[arg(long)]
    node_id: String,

    /// Credential issued to the node.
    #[arg(long)]
    api_key: String,

    /// Request timeout in seconds. Provisioning runs to completion before
    /// the coordinator answers.
    #[arg(long, default_value = "600")]
    timeout: u64,

    #[command(subcommand)]
    action: ServerAction,
}

#[derive(Subcommand)]
enum ServerAction {
    /// Provision (or re-provision) a server.
    Provision { server_id: String, version: String },
    Start { server_id: String },
    Stop { server_id: String },
    Delete { server_id: String },
    Status { server_id: String },
    /// Install plugins (name[@version]).
    Plugins {
        server_id: String,
        plugins: Vec<String>,
    },
}

pub async fn run(agent: &AgentConfig, args: ServerArgs) -> anyhow::Result<()> {
    let base_url = args
        .coordinator
        .as_deref()
        .unwrap_or(&agent.coordinator_url);
    let client = RpcClient::new(base_url, Duration::from_secs(args.timeout))?;

    let op = |server_id: String| ServerOperationRequest {
        node_id: args.node_id.clone(),
        api_key: args.api_key.clone(),
        server_id,
    };

    let (success, message) = match args.action {
        ServerAction::Provision { server_id, version } => {
            let resp = client
                .provision_server(&ProvisionServerRequest {
                    node_id: args.node_id.clone(),
                    api_key: args.api_key.clone(),
                    server_id,
                    version,
                })
                .await?;
            if resp.success {
                println!("instance: {}", resp.instance_id);
            }
            (resp.success, resp.message)
        }
        ServerAction::Start { server_id } => {
            let resp = client.start_server(&op(server_id)).await?;
            (resp.success, resp.message)
        }
        ServerAction::Stop { server_id } => {
            let resp = client.stop_server(&op(server_id)).await?;
            (resp.success, resp.message)
        }
        ServerAction::Delete { server_id } => {
            let resp = client.delete_server(&op(server_id)).await?;
            (resp.success, resp.message)
        }
        ServerAction::Status { server_id } => {
            let resp = client.get_server_status(&op(server_id)).await?;
            if resp.success {
                println!("{}: {}", resp.instance_id, resp.status);
            }
            (resp.success, resp.message)
        }
        ServerAction::Plugins { server_id, plugins } => {
            let resp = client
                .update_plugins(&UpdatePluginsRequest {
                    node_id: args.node_id.clone(),
                    api_key: args.api_key.clone(),
                    server_id,
                    plugins: plugins.iter().map(|p| parse_plugin(p)).collect(),
                })
                .await?;
            (resp.success, resp.message)
        }
    };

    if !success {
        bail!("{message}");
    }
    println!("{message}");
    Ok(())
}

fn parse_plugin(spec: &str) -> Plugin {
    let (name, version) = spec.split_once('@').unwrap_or((spec, ""));
    Plugin {
        name: name.to_string(),
        version: version.to_string(),
        download_url: String::new(),
    }
}
