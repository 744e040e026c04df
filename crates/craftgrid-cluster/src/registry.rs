//! In-memory fleet registry.
//!
//! One [`Registry`] holds every node, its credential, and the server
//! instances it hosts, including live process handles. It is shared as
//! [`SharedRegistry`] behind a single `RwLock`; callers hold the write
//! guard only while validating and mutating, never across network I/O
//! or a stop wait.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use craft_core::ServerConfig;
use craftgrid_state::{
    credentials_match, FleetError, FleetResult, NodeId, NodeInfo, NodeMetadata, NodeStatus,
    ServerId, ServerState, SystemMetrics,
};
use craftgrid_supervisor::ProcessHandle;
use tokio::sync::RwLock;

pub type SharedRegistry = Arc<RwLock<Registry>>;

/// A server instance as tracked by the coordinator.
#[derive(Debug)]
pub struct ServerEntry {
    pub state: ServerState,
    /// Configuration the instance was last provisioned with.
    pub config: Option<ServerConfig>,
    /// Present only while a process is running.
    pub handle: Option<ProcessHandle>,
    /// Provisioning run that last reset this entry.
    pub attempt: u64,
    /// A stop or kill owns the process handle and has not committed yet.
    pub stop_pending: bool,
}

impl ServerEntry {
    pub fn new(state: ServerState) -> Self {
        Self {
            state,
            config: None,
            handle: None,
            attempt: 0,
            stop_pending: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// True while a process is attached or a stop is still settling.
    pub fn is_busy(&self) -> bool {
        self.handle.is_some() || self.stop_pending
    }
}

/// A registered node.
#[derive(Debug)]
pub struct NodeEntry {
    pub id: NodeId,
    pub metadata: NodeMetadata,
    api_key: String,
    pub status: NodeStatus,
    pub last_seen: u64,
    pub metrics: Option<SystemMetrics>,
    pub servers: BTreeMap<ServerId, ServerEntry>,
}

impl NodeEntry {
    pub fn new(id: &str, metadata: NodeMetadata, api_key: String, now: u64) -> Self {
        Self {
            id: id.to_string(),
            metadata,
            api_key,
            status: NodeStatus::Online,
            last_seen: now,
            metrics: None,
            servers: BTreeMap::new(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn authorize(&self, presented: &str) -> FleetResult<()> {
        if credentials_match(&self.api_key, presented) {
            Ok(())
        } else {
            Err(FleetError::Unauthorized("invalid API key".to_string()))
        }
    }

    /// Record contact at `now`. `last_seen` never moves backwards.
    pub fn touch(&mut self, now: u64) {
        self.last_seen = self.last_seen.max(now);
        self.status = NodeStatus::Online;
    }

    pub fn server(&self, server_id: &str) -> FleetResult<&ServerEntry> {
        self.servers
            .get(server_id)
            .ok_or_else(|| server_not_found(server_id))
    }

    pub fn server_mut(&mut self, server_id: &str) -> FleetResult<&mut ServerEntry> {
        self.servers
            .get_mut(server_id)
            .ok_or_else(|| server_not_found(server_id))
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id.clone(),
            metadata: self.metadata.clone(),
            status: self.status,
            last_seen: self.last_seen,
            metrics: self.metrics.clone(),
            servers: self.servers.values().map(|s| s.state.clone()).collect(),
        }
    }
}

fn server_not_found(server_id: &str) -> FleetError {
    FleetError::NotFound(format!("server {server_id} not found"))
}

/// All nodes known to this coordinator.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: BTreeMap<NodeId, NodeEntry>,
    /// Server directories a provisioning pipeline is currently writing.
    /// Outlives the instance entry when it is deleted mid-run.
    pipelines: BTreeSet<ServerId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeEntry> {
        self.nodes.get(node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeEntry> {
        self.nodes.get_mut(node_id)
    }

    pub fn insert(&mut self, node: NodeEntry) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut NodeEntry> {
        self.nodes.values_mut()
    }

    /// Look up a node and check the presented credential.
    ///
    /// Fails with `InvalidArgument` for an empty id, `NotFound` for an
    /// unknown node and `Unauthorized` for a credential mismatch.
    pub fn authorized_node(&self, node_id: &str, api_key: &str) -> FleetResult<&NodeEntry> {
        require_node_id(node_id)?;
        let node = self.nodes.get(node_id).ok_or_else(|| node_not_found(node_id))?;
        node.authorize(api_key)?;
        Ok(node)
    }

    pub fn authorized_node_mut(
        &mut self,
        node_id: &str,
        api_key: &str,
    ) -> FleetResult<&mut NodeEntry> {
        require_node_id(node_id)?;
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| node_not_found(node_id))?;
        node.authorize(api_key)?;
        Ok(node)
    }

    /// Claim the directory of `server_id` for a pipeline run. False if a
    /// run already holds it.
    pub fn begin_pipeline(&mut self, server_id: &str) -> bool {
        self.pipelines.insert(server_id.to_string())
    }

    pub fn end_pipeline(&mut self, server_id: &str) {
        self.pipelines.remove(server_id);
    }

    pub fn pipeline_active(&self, server_id: &str) -> bool {
        self.pipelines.contains(server_id)
    }

    pub fn snapshot(&self) -> Vec<NodeInfo> {
        self.nodes.values().map(NodeEntry::info).collect()
    }
}

fn node_not_found(node_id: &str) -> FleetError {
    FleetError::NotFound(format!("node {node_id} not found"))
}

pub fn require_node_id(node_id: &str) -> FleetResult<()> {
    if node_id.is_empty() {
        return Err(FleetError::InvalidArgument("node_id is required".to_string()));
    }
    Ok(())
}

/// Server ids name directories under the servers root, so they must be
/// a single plain path component.
pub fn validate_server_id(server_id: &str) -> FleetResult<()> {
    if server_id.is_empty() {
        return Err(FleetError::InvalidArgument("server_id is required".to_string()));
    }
    if server_id.contains(['/', '\\']) || server_id.contains("..") || server_id.contains('\0') {
        return Err(FleetError::InvalidArgument(format!(
            "server_id {server_id:?} is not a valid directory name"
        )));
    }
    Ok(())
}
