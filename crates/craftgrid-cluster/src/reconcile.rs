//! Background reconciliation loops.
//!
//! Three periodic tasks run next to the RPC surface:
//!
//! - **liveness**: flips nodes between online and offline from heartbeat
//!   recency.
//! - **state sync**: pushes every node status and its server statuses to
//!   the management API.
//! - **metrics sync**: pushes the latest metrics of every node that has
//!   reported any.
//!
//! Sync passes copy what they need under the read lock and release it
//! before the first network call. A failed push is logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use craft_core::config::CoordinatorConfig;
use craftgrid_management::{ManagementApi, NodeStatusUpdate, ServerStatusUpdate};
use craftgrid_state::{NodeInfo, SystemMetrics};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::membership::MembershipManager;

/// Loop periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileIntervals {
    pub liveness: Duration,
    pub state_sync: Duration,
    pub metrics_sync: Duration,
}

impl Default for ReconcileIntervals {
    fn default() -> Self {
        Self {
            liveness: Duration::from_secs(10),
            state_sync: Duration::from_secs(30),
            metrics_sync: Duration::from_secs(60),
        }
    }
}

impl From<&CoordinatorConfig> for ReconcileIntervals {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            liveness: config.liveness_interval(),
            state_sync: config.state_sync_interval(),
            metrics_sync: config.metrics_sync_interval(),
        }
    }
}

pub struct Reconciler {
    membership: Arc<MembershipManager>,
    management: Arc<dyn ManagementApi>,
    intervals: ReconcileIntervals,
}

impl Reconciler {
    pub fn new(
        membership: Arc<MembershipManager>,
        management: Arc<dyn ManagementApi>,
        intervals: ReconcileIntervals,
    ) -> Self {
        Self {
            membership,
            management,
            intervals,
        }
    }

    pub fn intervals(&self) -> ReconcileIntervals {
        self.intervals
    }

    /// Run the liveness sweep until shutdown.
    pub async fn run_liveness(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.intervals.liveness.as_secs(), "liveness sweep started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.intervals.liveness) => {
                    let changed = self.membership.sweep_liveness().await;
                    if !changed.is_empty() {
                        debug!(changed = changed.len(), "liveness sweep updated nodes");
                    }
                }
                _ = shutdown.changed() => {
                    info!("liveness sweep shutting down");
                    break;
                }
            }
        }
    }

    /// Run the state sync loop until shutdown.
    pub async fn run_state_sync(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.intervals.state_sync.as_secs(), "state sync started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.intervals.state_sync) => {
                    let synced = self.sync_states_once().await;
                    debug!(nodes = synced, "state sync pass complete");
                }
                _ = shutdown.changed() => {
                    info!("state sync shutting down");
                    break;
                }
            }
        }
    }

    /// Run the metrics sync loop until shutdown.
    pub async fn run_metrics_sync(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.intervals.metrics_sync.as_secs(), "metrics sync started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.intervals.metrics_sync) => {
                    let synced = self.sync_metrics_once().await;
                    debug!(nodes = synced, "metrics sync pass complete");
                }
                _ = shutdown.changed() => {
                    info!("metrics sync shutting down");
                    break;
                }
            }
        }
    }

    /// Push every node's status followed by its server statuses.
    ///
    /// Returns the number of nodes whose pushes all succeeded.
    pub async fn sync_states_once(&self) -> usize {
        let snapshot = self.membership.list_nodes().await;

        let mut pushes = JoinSet::new();
        for node in snapshot {
            let management = Arc::clone(&self.management);
            pushes.spawn(async move { push_node_state(management.as_ref(), &node).await });
        }
        count_ok(pushes).await
    }

    /// Push metrics for every node that has reported any.
    ///
    /// Returns the number of successful pushes.
    pub async fn sync_metrics_once(&self) -> usize {
        let snapshot = self.membership.list_nodes().await;

        let mut pushes = JoinSet::new();
        for node in snapshot {
            let Some(metrics) = node.metrics.as_ref() else {
                continue;
            };
            let update = NodeStatusUpdate::new(node.status, node.last_seen, metrics);
            let management = Arc::clone(&self.management);
            pushes.spawn(async move {
                match management.update_node_status(&node.id, &update).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(node_id = %node.id, error = %e, "metrics push failed");
                        false
                    }
                }
            });
        }
        count_ok(pushes).await
    }
}

async fn push_node_state(management: &dyn ManagementApi, node: &NodeInfo) -> bool {
    let metrics = node.metrics.clone().unwrap_or_else(|| {
        SystemMetrics::initial(node.metadata.cpu_cores, node.metadata.memory_bytes)
    });
    let update = NodeStatusUpdate::new(node.status, node.last_seen, &metrics);
    if let Err(e) = management.update_node_status(&node.id, &update).await {
        warn!(node_id = %node.id, error = %e, "node status push failed");
        return false;
    }

    let mut all_ok = true;
    for server in &node.servers {
        let update = ServerStatusUpdate::from(server);
        if let Err(e) = management.update_server_status(&server.server_id, &update).await {
            warn!(node_id = %node.id, server_id = %server.server_id, error = %e, "server status push failed");
            all_ok = false;
        }
    }
    all_ok
}

async fn count_ok(mut pushes: JoinSet<bool>) -> usize {
    let mut ok = 0;
    while let Some(result) = pushes.join_next().await {
        match result {
            Ok(true) => ok += 1,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "sync task failed"),
        }
    }
    ok
}
