//! Fleet orchestrator: server instance lifecycle.
//!
//! Drives the provisioning pipeline and the process supervisor on behalf
//! of the RPC surface, and owns every lifecycle transition:
//!
//! ```text
//! provisioning → provisioning_setup → provisioning_download → provisioning_config
//!     → provisioned | failed
//! provisioned/stopped/error → running → stopping → stopped
//!                             running → error | stopped   (process exited on its own)
//! ```
//!
//! The registry write lock is held only to validate a request and to
//! apply a transition. The pipeline run and the graceful-stop wait happen
//! with the lock released; progress comes back as events and is applied
//! one at a time.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use craft_core::ServerConfig;
use craftgrid_management::{ManagementApi, ServerStatusUpdate};
use craftgrid_provision::{ProvisionEvent, ProvisionRequest, Provisioner};
use craftgrid_state::{FleetError, FleetResult, NodeId, ServerId, ServerState, ServerStatus};
use craftgrid_supervisor::{
    ProcessEvent, ProcessExit, ProcessHandle, ProcessId, ProcessSupervisor, StopOutcome,
    SupervisorError,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::registry::{validate_server_id, Registry, ServerEntry, SharedRegistry};

const CHANGE_BUFFER: usize = 256;
const PROGRESS_BUFFER: usize = 16;

/// A server instance changed state. `state` is `None` once deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub node_id: NodeId,
    pub server_id: ServerId,
    pub state: Option<ServerState>,
}

/// Composition root for server lifecycle operations. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SharedRegistry,
    provisioner: Provisioner,
    supervisor: ProcessSupervisor,
    management: Arc<dyn ManagementApi>,
    stop_timeout: Duration,
    changes: broadcast::Sender<StatusChange>,
    pushes: mpsc::UnboundedSender<(ServerId, ServerStatusUpdate)>,
    attempts: AtomicU64,
}

impl Orchestrator {
    /// Must be called from within a Tokio runtime: status pushes to the
    /// management API run on a background task started here.
    pub fn new(
        registry: SharedRegistry,
        provisioner: Provisioner,
        supervisor: ProcessSupervisor,
        management: Arc<dyn ManagementApi>,
        stop_timeout: Duration,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let (pushes, queue) = mpsc::unbounded_channel();
        tokio::spawn(push_statuses(management.clone(), queue));

        Self {
            inner: Arc::new(Inner {
                registry,
                provisioner,
                supervisor,
                management,
                stop_timeout,
                changes,
                pushes,
                attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.inner.registry
    }

    /// Stream of every server status transition.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.changes.subscribe()
    }

    /// Provision (or re-provision in place) a server on a node.
    ///
    /// Runs the whole pipeline before returning. Re-provisioning resets
    /// the instance and overwrites its files; it is refused while the
    /// instance is running, stopping, or already provisioning. The run
    /// continues to completion even if the caller goes away.
    pub async fn provision_server(
        &self,
        node_id: &str,
        api_key: &str,
        server_id: &str,
        version: &str,
    ) -> FleetResult<ServerId> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut registry = self.inner.registry.write().await;
            let claimed = registry.pipeline_active(server_id);
            let node = registry.authorized_node_mut(node_id, api_key)?;
            validate_server_id(server_id)?;
            if version.trim().is_empty() {
                return Err(FleetError::InvalidArgument("version is required".to_string()));
            }

            let state = ServerState::provisioning(server_id, server_id, version);
            match node.servers.get_mut(server_id) {
                Some(entry) => {
                    if entry.is_busy() {
                        return Err(FleetError::Conflict(format!(
                            "server {server_id} is running; stop it before re-provisioning"
                        )));
                    }
                    if claimed || entry.state.status.is_provisioning() {
                        return Err(FleetError::Conflict(format!(
                            "server {server_id} is already being provisioned"
                        )));
                    }
                    info!(%node_id, %server_id, previous = %entry.state.status, "re-provisioning server in place");
                    entry.state = state.clone();
                    entry.attempt = attempt;
                }
                None if claimed => {
                    return Err(FleetError::Conflict(format!(
                        "server {server_id} is still being cleaned up from an earlier provisioning run"
                    )));
                }
                None => {
                    let mut entry = ServerEntry::new(state.clone());
                    entry.attempt = attempt;
                    node.servers.insert(server_id.to_string(), entry);
                }
            }
            registry.begin_pipeline(server_id);
            self.publish(node_id, &state);
        }

        let run = tokio::spawn(self.clone().run_pipeline(
            node_id.to_string(),
            server_id.to_string(),
            version.to_string(),
            attempt,
        ));
        run.await.map_err(|e| {
            FleetError::DependencyFailure(format!("Failed to provision server: pipeline task failed: {e}"))
        })?
    }

    /// Run the pipeline for a claimed server directory and commit the
    /// result. Always releases the claim.
    async fn run_pipeline(
        self,
        node_id: NodeId,
        server_id: ServerId,
        version: String,
        attempt: u64,
    ) -> FleetResult<ServerId> {
        let config = self.server_config(&server_id).await;
        let request = ProvisionRequest {
            server_id: server_id.clone(),
            version,
            config: config.clone(),
        };

        let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
        let inner = self.inner.clone();
        let pipeline = async move { inner.provisioner.provision(&request, &tx).await };
        let apply = async {
            while let Some(event) = rx.recv().await {
                self.apply_progress(&node_id, &server_id, attempt, &event).await;
            }
        };
        let (result, ()) = tokio::join!(pipeline, apply);

        let mut registry = self.inner.registry.write().await;
        let entry = registry
            .node_mut(&node_id)
            .and_then(|node| node.servers.get_mut(&server_id))
            .filter(|entry| entry.attempt == attempt);
        let Some(entry) = entry else {
            // Deleted mid-run. The claim still blocks new runs, so the
            // files written by this run can be removed without racing one.
            drop(registry);
            warn!(%node_id, %server_id, "server removed during provisioning; discarding its files");
            let dir = self.inner.provisioner.server_dir(&server_id);
            if let Err(e) = remove_server_dir(&dir).await {
                warn!(%server_id, dir = %dir.display(), error = %e, "failed to remove files of deleted server");
            }
            self.inner.registry.write().await.end_pipeline(&server_id);
            return Err(FleetError::Conflict(format!(
                "server {server_id} was deleted during provisioning"
            )));
        };

        let committed = match result {
            Ok(outcome) => {
                entry.state.status = ServerStatus::Provisioned;
                entry.state.message = "Server provisioned successfully".to_string();
                entry.state.name = config.server_name.clone();
                entry.config = Some(config);
                self.publish(&node_id, &entry.state);
                debug!(%server_id, sha256 = %outcome.artifact_sha256, dir = %outcome.server_dir.display(), "provisioning committed");
                Ok(server_id.clone())
            }
            Err(e) => {
                let message = format!("Failed to provision server: {e}");
                entry.state.status = ServerStatus::Failed;
                entry.state.message = message.clone();
                self.publish(&node_id, &entry.state);
                Err(FleetError::DependencyFailure(message))
            }
        };
        registry.end_pipeline(&server_id);
        committed
    }

    /// Spawn the server process. Rejected without side effects if the
    /// instance already has a process.
    pub async fn start_server(&self, node_id: &str, api_key: &str, server_id: &str) -> FleetResult<()> {
        let mut registry = self.inner.registry.write().await;
        let node = registry.authorized_node_mut(node_id, api_key)?;
        validate_server_id(server_id)?;
        let entry = node.server_mut(server_id)?;

        if entry.is_running() {
            return Err(FleetError::Conflict(format!("server {server_id} is already running")));
        }
        if entry.stop_pending {
            return Err(FleetError::Conflict(format!("server {server_id} is stopping")));
        }
        if entry.state.status.is_provisioning() {
            return Err(FleetError::Conflict(format!(
                "server {server_id} is still being provisioned"
            )));
        }

        let dir = self.inner.provisioner.server_dir(server_id);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = self
            .inner
            .supervisor
            .start(server_id, &dir, events_tx)
            .await
            .map_err(|e| match e {
                SupervisorError::ScriptNotFound(_) => {
                    FleetError::NotFound(format!("server {server_id} is not provisioned: {e}"))
                }
                other => FleetError::ProcessFailure(other.to_string()),
            })?;

        let process = handle.id();
        entry.handle = Some(handle);
        entry.state.status = ServerStatus::Running;
        entry.state.message = "Server is running".to_string();
        entry.state.player_count = 0;
        entry.state.ready = false;
        self.publish(node_id, &entry.state);
        drop(registry);

        tokio::spawn(self.clone().watch_process(
            node_id.to_string(),
            server_id.to_string(),
            process,
            events_rx,
        ));
        info!(%node_id, %server_id, %process, "server started");
        Ok(())
    }

    /// Stop the server process: graceful command first, kill after the
    /// stop timeout. The wait happens without holding the registry lock.
    pub async fn stop_server(&self, node_id: &str, api_key: &str, server_id: &str) -> FleetResult<()> {
        let handle = {
            let mut registry = self.inner.registry.write().await;
            let node = registry.authorized_node_mut(node_id, api_key)?;
            validate_server_id(server_id)?;
            let entry = node.server_mut(server_id)?;

            let Some(handle) = entry.handle.take() else {
                return Err(FleetError::Conflict(format!("server {server_id} is not running")));
            };
            entry.stop_pending = true;
            entry.state.status = ServerStatus::Stopping;
            entry.state.message = "Stopping server".to_string();
            self.publish(node_id, &entry.state);
            handle
        };

        let outcome = handle.stop(self.inner.stop_timeout).await;
        info!(%node_id, %server_id, ?outcome, "server stopped");

        let mut registry = self.inner.registry.write().await;
        if let Some(entry) = registry
            .node_mut(node_id)
            .and_then(|node| node.servers.get_mut(server_id))
        {
            if entry.stop_pending {
                settle_stop(entry, outcome);
                self.publish(node_id, &entry.state);
            }
        }
        Ok(())
    }

    /// Remove a server and its directory, killing its process first.
    ///
    /// A missing directory counts as removed. Any other removal failure is
    /// returned and the instance is kept so the delete can be retried.
    pub async fn delete_server(&self, node_id: &str, api_key: &str, server_id: &str) -> FleetResult<()> {
        let handle = {
            let mut registry = self.inner.registry.write().await;
            let node = registry.authorized_node_mut(node_id, api_key)?;
            validate_server_id(server_id)?;
            let entry = node.server_mut(server_id)?;

            let handle = entry.handle.take();
            if handle.is_some() {
                entry.stop_pending = true;
                entry.state.status = ServerStatus::Stopping;
                entry.state.message = "Stopping server for deletion".to_string();
                self.publish(node_id, &entry.state);
            }
            handle
        };

        let killed = match handle {
            Some(handle) => {
                let outcome = handle.kill().await;
                debug!(%server_id, ?outcome, "killed server before deletion");
                Some(outcome)
            }
            None => None,
        };

        let dir = self.inner.provisioner.server_dir(server_id);
        let removal = remove_server_dir(&dir).await;

        let mut registry = self.inner.registry.write().await;
        let Some(node) = registry.node_mut(node_id) else {
            return Ok(());
        };

        match removal {
            Ok(()) => {
                node.servers.remove(server_id);
                let _ = self.inner.changes.send(StatusChange {
                    node_id: node_id.to_string(),
                    server_id: server_id.to_string(),
                    state: None,
                });
                info!(%node_id, %server_id, "server deleted");
                Ok(())
            }
            Err(e) => {
                let message = format!("failed to remove server directory {}: {e}", dir.display());
                warn!(%node_id, %server_id, error = %e, "server deletion failed");
                if let Some(entry) = node.servers.get_mut(server_id) {
                    if let Some(outcome) = killed.filter(|_| entry.stop_pending) {
                        settle_stop(entry, outcome);
                    }
                    entry.state.message = message.clone();
                    self.publish(node_id, &entry.state);
                }
                Err(FleetError::DependencyFailure(message))
            }
        }
    }

    pub async fn server_status(&self, node_id: &str, api_key: &str, server_id: &str) -> FleetResult<ServerState> {
        let registry = self.inner.registry.read().await;
        let node = registry.authorized_node(node_id, api_key)?;
        validate_server_id(server_id)?;
        Ok(node.server(server_id)?.state.clone())
    }

    /// Gracefully stop every running server, concurrently.
    pub async fn stop_all(&self) {
        let handles: Vec<(NodeId, ServerId, ProcessHandle)> = {
            let mut registry = self.inner.registry.write().await;
            let mut handles = Vec::new();
            for node in registry.nodes_mut() {
                for (server_id, entry) in node.servers.iter_mut() {
                    if let Some(handle) = entry.handle.take() {
                        entry.stop_pending = true;
                        entry.state.status = ServerStatus::Stopping;
                        handles.push((node.id.clone(), server_id.clone(), handle));
                    }
                }
            }
            handles
        };
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "stopping all servers");
        let mut stops = JoinSet::new();
        for (node_id, server_id, handle) in handles {
            let timeout = self.inner.stop_timeout;
            stops.spawn(async move { (node_id, server_id, handle.stop(timeout).await) });
        }

        while let Some(joined) = stops.join_next().await {
            let Ok((node_id, server_id, outcome)) = joined else {
                continue;
            };
            let mut registry = self.inner.registry.write().await;
            if let Some(entry) = registry
                .node_mut(&node_id)
                .and_then(|node| node.servers.get_mut(&server_id))
            {
                settle_stop(entry, outcome);
                self.publish(&node_id, &entry.state);
            }
        }
    }

    /// Declared configuration from the management API, defaults otherwise.
    async fn server_config(&self, server_id: &str) -> ServerConfig {
        match self.inner.management.fetch_server_config(server_id).await {
            Ok(Some(mut config)) => {
                if config.server_name.is_empty() {
                    config.server_name = server_id.to_string();
                }
                config
            }
            Ok(None) => {
                debug!(%server_id, "no declared config, using defaults");
                ServerConfig::named(server_id)
            }
            Err(e) => {
                warn!(%server_id, error = %e, "failed to fetch server config, using defaults");
                ServerConfig::named(server_id)
            }
        }
    }

    async fn apply_progress(&self, node_id: &str, server_id: &str, attempt: u64, event: &ProvisionEvent) {
        if event.error.is_some() {
            return;
        }
        let mut registry = self.inner.registry.write().await;
        let Some(entry) = registry
            .node_mut(node_id)
            .and_then(|node| node.servers.get_mut(server_id))
            .filter(|entry| entry.attempt == attempt)
        else {
            return;
        };

        entry.state.status = ServerStatus::ProvisioningStage(event.stage);
        entry.state.message = format!("{} ({}%)", event.message, event.progress);
        self.publish(node_id, &entry.state);
    }

    async fn watch_process(
        self,
        node_id: NodeId,
        server_id: ServerId,
        process: ProcessId,
        mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Ready { .. } => {
                    let mut registry = self.inner.registry.write().await;
                    if let Some(entry) = owned_entry(&mut registry, &node_id, &server_id, process) {
                        entry.state.ready = true;
                        entry.state.message = "Server is ready".to_string();
                        self.publish(&node_id, &entry.state);
                    }
                }
                ProcessEvent::Output { .. } => {}
                ProcessEvent::Exited { exit, .. } => {
                    if !exit.requested {
                        self.handle_unexpected_exit(&node_id, &server_id, process, exit).await;
                    }
                    break;
                }
            }
        }
    }

    async fn handle_unexpected_exit(&self, node_id: &str, server_id: &str, process: ProcessId, exit: ProcessExit) {
        let mut registry = self.inner.registry.write().await;
        let Some(entry) = owned_entry(&mut registry, node_id, server_id, process) else {
            return;
        };

        mark_exited(entry, exit);
        warn!(%node_id, %server_id, status = %entry.state.status, "server process exited on its own");
        self.publish(node_id, &entry.state);
    }

    fn publish(&self, node_id: &str, state: &ServerState) {
        let _ = self.inner.changes.send(StatusChange {
            node_id: node_id.to_string(),
            server_id: state.server_id.clone(),
            state: Some(state.clone()),
        });
        let _ = self
            .inner
            .pushes
            .send((state.server_id.clone(), ServerStatusUpdate::from(state)));
    }
}

/// The entry for `server_id`, if its current handle is `process`.
fn owned_entry<'a>(
    registry: &'a mut Registry,
    node_id: &str,
    server_id: &str,
    process: ProcessId,
) -> Option<&'a mut ServerEntry> {
    registry
        .node_mut(node_id)
        .and_then(|node| node.servers.get_mut(server_id))
        .filter(|entry| entry.handle.as_ref().is_some_and(|h| h.id() == process))
}

fn mark_stopped(entry: &mut ServerEntry, message: String) {
    entry.state.status = ServerStatus::Stopped;
    entry.state.message = message;
    entry.state.player_count = 0;
    entry.state.ready = false;
}

/// Record an exit nobody asked for: clean is `stopped`, anything else
/// is `error`.
fn mark_exited(entry: &mut ServerEntry, exit: ProcessExit) {
    entry.handle = None;
    entry.state.status = if exit.success {
        ServerStatus::Stopped
    } else {
        ServerStatus::Error
    };
    entry.state.message = match exit.code {
        Some(code) => format!("Server process exited with code {code}"),
        None => "Server process was terminated by a signal".to_string(),
    };
    entry.state.player_count = 0;
    entry.state.ready = false;
}

/// Commit the result of a stop or kill that owned the handle.
fn settle_stop(entry: &mut ServerEntry, outcome: StopOutcome) {
    entry.stop_pending = false;
    match outcome {
        StopOutcome::Graceful { .. } => mark_stopped(entry, "Server stopped".to_string()),
        StopOutcome::Forced => mark_stopped(entry, "Server killed after stop timeout".to_string()),
        StopOutcome::AlreadyExited { exit } => mark_exited(entry, exit),
    }
}

/// Remove a server directory. One that is already gone counts as removed.
async fn remove_server_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Forward status transitions to the management API in order.
async fn push_statuses(
    management: Arc<dyn ManagementApi>,
    mut queue: mpsc::UnboundedReceiver<(ServerId, ServerStatusUpdate)>,
) {
    while let Some((server_id, update)) = queue.recv().await {
        if let Err(e) = management.update_server_status(&server_id, &update).await {
            warn!(%server_id, status = %update.status, error = %e, "failed to push server status");
        }
    }
}
