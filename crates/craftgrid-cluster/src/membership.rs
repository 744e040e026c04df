//! Membership manager: node registration, heartbeats and liveness.
//!
//! Nodes pick their own ids and are issued a credential on first
//! registration. Liveness is derived: a node is `offline` once it has
//! been silent for longer than the offline threshold and flips back to
//! `online` on its next heartbeat. Nodes are never evicted.

use std::sync::Arc;
use std::time::Duration;

use craftgrid_management::{ManagementApi, NodeStatusUpdate};
use craftgrid_state::{
    epoch_secs, generate_api_key, FleetError, FleetResult, NodeId, NodeInfo, NodeMetadata,
    NodeStatus, ServerState, SystemMetrics,
};
use tracing::{debug, info, warn};

use crate::registry::{require_node_id, NodeEntry, ServerEntry, SharedRegistry};

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// First contact: a credential was issued.
    Created { api_key: String },
    /// Known node presenting its credential.
    Reconnected,
}

/// Tracks node membership on top of the shared registry.
pub struct MembershipManager {
    registry: SharedRegistry,
    management: Arc<dyn ManagementApi>,
    offline_threshold: Duration,
}

impl MembershipManager {
    pub fn new(registry: SharedRegistry, management: Arc<dyn ManagementApi>) -> Self {
        Self {
            registry,
            management,
            offline_threshold: Duration::from_secs(60),
        }
    }

    /// Silence after which a node is flagged offline.
    pub fn with_offline_threshold(mut self, threshold: Duration) -> Self {
        self.offline_threshold = threshold;
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Register a node, or reconnect a known one.
    ///
    /// A new node gets a fresh credential and an initial zero metrics push
    /// to the management API; that push is best-effort. A known node must
    /// present its credential and is only marked seen.
    pub async fn register(
        &self,
        node_id: &str,
        metadata: NodeMetadata,
        presented_key: Option<&str>,
    ) -> FleetResult<Registration> {
        require_node_id(node_id)?;
        let now = epoch_secs();

        let (api_key, initial_push) = {
            let mut registry = self.registry.write().await;
            if let Some(node) = registry.node_mut(node_id) {
                node.authorize(presented_key.unwrap_or_default())?;
                node.touch(now);
                info!(%node_id, "node reconnected");
                return Ok(Registration::Reconnected);
            }

            let api_key = generate_api_key();
            let initial = SystemMetrics::initial(metadata.cpu_cores, metadata.memory_bytes);
            registry.insert(NodeEntry::new(node_id, metadata, api_key.clone(), now));
            info!(%node_id, "node registered");

            let push = NodeStatusUpdate::new(NodeStatus::Online, now, &initial).with_api_key(&api_key);
            (api_key, push)
        };

        if let Err(e) = self.management.update_node_status(node_id, &initial_push).await {
            warn!(%node_id, error = %e, "failed to push initial node status");
        }

        Ok(Registration::Created { api_key })
    }

    /// Apply a heartbeat: refresh liveness, store metrics and upsert every
    /// reported server state. Unreported servers are left alone.
    pub async fn heartbeat(
        &self,
        node_id: &str,
        api_key: &str,
        metrics: SystemMetrics,
        reported: Vec<ServerState>,
    ) -> FleetResult<()> {
        let now = epoch_secs();
        let mut registry = self.registry.write().await;
        let node = registry.authorized_node_mut(node_id, api_key)?;

        if node.status == NodeStatus::Offline {
            info!(%node_id, "node back online");
        }
        node.touch(now);
        node.metrics = Some(metrics);

        let mut upserted = 0usize;
        for state in reported {
            if state.server_id.is_empty() {
                continue;
            }
            match node.servers.get_mut(&state.server_id) {
                Some(entry) => entry.state = state,
                None => {
                    node.servers
                        .insert(state.server_id.clone(), ServerEntry::new(state));
                }
            }
            upserted += 1;
        }

        debug!(%node_id, servers = upserted, "heartbeat received");
        Ok(())
    }

    /// Run one liveness sweep against the wall clock.
    pub async fn sweep_liveness(&self) -> Vec<(NodeId, NodeStatus)> {
        self.sweep_liveness_at(epoch_secs()).await
    }

    /// Run one liveness sweep as of `now` (unix seconds).
    ///
    /// Returns the nodes whose status changed.
    pub async fn sweep_liveness_at(&self, now: u64) -> Vec<(NodeId, NodeStatus)> {
        let threshold = self.offline_threshold.as_secs();
        let mut changed = Vec::new();

        let mut registry = self.registry.write().await;
        for node in registry.nodes_mut() {
            let silent_for = now.saturating_sub(node.last_seen);
            let status = if silent_for > threshold {
                NodeStatus::Offline
            } else {
                NodeStatus::Online
            };
            if status == node.status {
                continue;
            }

            match status {
                NodeStatus::Offline => {
                    warn!(node_id = %node.id, silent_secs = silent_for, "node marked offline")
                }
                NodeStatus::Online => info!(node_id = %node.id, "node marked online"),
            }
            node.status = status;
            changed.push((node.id.clone(), status));
        }

        changed
    }

    pub async fn list_nodes(&self) -> Vec<NodeInfo> {
        self.registry.read().await.snapshot()
    }

    pub async fn get_node(&self, node_id: &str) -> FleetResult<NodeInfo> {
        self.registry
            .read()
            .await
            .node(node_id)
            .map(NodeEntry::info)
            .ok_or_else(|| FleetError::NotFound(format!("node {node_id} not found")))
    }
}
