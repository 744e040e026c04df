//! Control plane mode: the coordinator.
//!
//! In this mode, the daemon:
//! 1. Builds the management client (or a no-op when disabled)
//! 2. Wires registry, membership, provisioner, supervisor and orchestrator
//! 3. Runs the liveness, state sync and metrics sync loops
//! 4. Serves the RPC surface over HTTP
//! 5. On shutdown, stops every running server before exiting

use std::sync::Arc;

use anyhow::Context;
use craft_core::{ArtifactSource, CraftConfig};
use craftgrid_cluster::{
    FleetService, MembershipManager, Orchestrator, ReconcileIntervals, Reconciler, Registry,
};
use craftgrid_management::{HttpManagementClient, ManagementApi, NoopManagement};
use craftgrid_provision::{fetcher_for, Provisioner};
use craftgrid_supervisor::{ProcessSupervisor, SupervisorConfig};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Run the coordinator until Ctrl-C.
pub async fn run_control_plane(config: CraftConfig) -> anyhow::Result<()> {
    info!("CraftGrid daemon starting in control-plane mode");

    let servers_dir = config.coordinator.servers_dir.clone();
    std::fs::create_dir_all(&servers_dir)
        .with_context(|| format!("failed to create {}", servers_dir.display()))?;

    // ── Management API ───────────────────────────────────────────
    let management: Arc<dyn ManagementApi> = if config.management.enabled {
        let client = HttpManagementClient::new(&config.management)?;
        info!(base_url = %client.base_url(), "management API client initialized");
        Arc::new(client)
    } else {
        info!("management API disabled");
        Arc::new(NoopManagement)
    };

    // ── Provisioning + supervision ───────────────────────────────
    let source = ArtifactSource::parse(&config.artifacts.source)?;
    info!(scheme = source.scheme(), source = %config.artifacts.source, "artifact source configured");
    let provisioner = Provisioner::new(&servers_dir, fetcher_for(&source))
        .with_java(config.artifacts.java_path.clone());
    let supervisor = ProcessSupervisor::new(SupervisorConfig::default());

    // ── Registry, membership, orchestrator ───────────────────────
    let registry = Registry::shared();
    let membership = Arc::new(
        MembershipManager::new(registry.clone(), management.clone())
            .with_offline_threshold(config.coordinator.offline_threshold()),
    );
    let orchestrator = Orchestrator::new(
        registry,
        provisioner,
        supervisor,
        management.clone(),
        config.coordinator.stop_timeout(),
    );
    info!(servers_dir = %servers_dir.display(), "orchestrator initialized");

    // ── Background tasks ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&membership),
        management,
        ReconcileIntervals::from(&config.coordinator),
    ));

    let liveness = {
        let reconciler = Arc::clone(&reconciler);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { reconciler.run_liveness(shutdown).await })
    };
    let state_sync = {
        let reconciler = Arc::clone(&reconciler);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { reconciler.run_state_sync(shutdown).await })
    };
    let metrics_sync = {
        let reconciler = Arc::clone(&reconciler);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { reconciler.run_metrics_sync(shutdown).await })
    };
    let transitions = tokio::spawn(log_transitions(orchestrator.subscribe(), shutdown_rx));

    // ── RPC server ───────────────────────────────────────────────
    let router = craftgrid_api::build_router(FleetService::new(membership, orchestrator.clone()));
    let listener = tokio::net::TcpListener::bind(&config.coordinator.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.coordinator.listen))?;
    info!(addr = %config.coordinator.listen, "RPC server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            crate::shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Clean up.
    let _ = liveness.await;
    let _ = state_sync.await;
    let _ = metrics_sync.await;
    let _ = transitions.await;
    orchestrator.stop_all().await;

    info!("control plane stopped");
    Ok(())
}

/// Trace every server status transition.
async fn log_transitions(
    mut changes: broadcast::Receiver<craftgrid_cluster::StatusChange>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => match change.state {
                    Some(state) => debug!(
                        node_id = %change.node_id,
                        server_id = %change.server_id,
                        status = %state.status,
                        message = %state.message,
                        "server status changed"
                    ),
                    None => debug!(node_id = %change.node_id, server_id = %change.server_id, "server removed"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status change log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}
