//! Agent mode: runs on worker nodes.
//!
//! In this mode, the daemon:
//! 1. Detects host metadata and resolves the node id
//! 2. Registers with the coordinator, retrying until it succeeds
//! 3. Heartbeats with host metrics until Ctrl-C

use std::sync::Arc;
use std::time::Duration;

use craft_core::config::AgentConfig;
use craftgrid_cluster::{AgentSettings, HostMetrics, NodeAgent, RpcClient};
use tokio::sync::watch;
use tracing::info;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the agent node.
pub async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    info!("CraftGrid daemon starting in agent mode");

    let settings = AgentSettings::from_config(&config);
    let metrics = Arc::new(HostMetrics::new(&settings.metadata));
    let client = RpcClient::new(&config.coordinator_url, RPC_TIMEOUT)?;
    info!(
        node_id = %settings.node_id,
        coordinator = %client.base_url(),
        hostname = %settings.metadata.hostname,
        cpu_cores = settings.metadata.cpu_cores,
        "agent configured"
    );

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        crate::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // ── Register, then heartbeat ─────────────────────────────────
    let mut agent = NodeAgent::new(client, settings, metrics);
    agent.register(&mut shutdown_rx).await?;
    agent.run_heartbeat(shutdown_rx).await?;

    info!("agent stopped");
    Ok(())
}
