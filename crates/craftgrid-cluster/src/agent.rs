//! Node agent: client-side fleet participation.
//!
//! The agent runs on each worker host. It registers with the
//! coordinator (retrying at a fixed delay until it succeeds), caches the
//! issued credential on disk so a restart reconnects instead of
//! re-registering, then heartbeats with a metrics snapshot from a
//! [`MetricsSource`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use craft_core::config::AgentConfig;
use craftgrid_state::{NodeMetadata, ServerState, SystemMetrics};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::rpc::{HeartbeatRequest, RegisterNodeRequest, RpcClient};

/// Resolved agent settings.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub node_id: String,
    pub metadata: NodeMetadata,
    pub heartbeat_interval: Duration,
    pub retry_delay: Duration,
    pub credentials_path: PathBuf,
}

impl AgentSettings {
    /// Build settings from config, detecting host metadata. The node id
    /// defaults to the hostname.
    pub fn from_config(config: &AgentConfig) -> Self {
        let metadata = detect_metadata();
        let node_id = config
            .node_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| metadata.hostname.clone());
        Self {
            node_id,
            metadata,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            credentials_path: config.credentials_path.clone(),
        }
    }
}

/// Supplies the opaque metrics snapshot and server report sent with each
/// heartbeat.
pub trait MetricsSource: Send + Sync {
    fn collect(&self) -> SystemMetrics;

    fn server_statuses(&self) -> Vec<ServerState> {
        Vec::new()
    }
}

/// Best-effort host metrics. Reads `/proc` on Linux and reports only the
/// static figures elsewhere.
#[derive(Debug, Clone)]
pub struct HostMetrics {
    cpu_cores: u32,
    memory_total: u64,
}

impl HostMetrics {
    pub fn new(metadata: &NodeMetadata) -> Self {
        Self {
            cpu_cores: metadata.cpu_cores,
            memory_total: metadata.memory_bytes,
        }
    }
}

impl MetricsSource for HostMetrics {
    fn collect(&self) -> SystemMetrics {
        let mut metrics = SystemMetrics::initial(self.cpu_cores, self.memory_total);

        if let Ok(loadavg) = std::fs::read_to_string("/proc/loadavg") {
            if let Some(load) = loadavg
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
            {
                metrics.cpu_usage = (load / f64::from(self.cpu_cores.max(1))).min(1.0);
            }
        }
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            let total = meminfo_field(&meminfo, "MemTotal:");
            let available = meminfo_field(&meminfo, "MemAvailable:");
            if let (Some(total), Some(available)) = (total, available) {
                metrics.memory_total = total;
                metrics.memory_used = total.saturating_sub(available);
            }
        }
        metrics
    }
}

/// Parse a `/proc/meminfo` line into bytes.
fn meminfo_field(meminfo: &str, name: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix(name))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Describe this host for registration.
pub fn detect_metadata() -> NodeMetadata {
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string());

    let cpu_cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);

    let memory_bytes = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|m| meminfo_field(&m, "MemTotal:"))
        .unwrap_or(0);

    NodeMetadata {
        hostname,
        os: std::env::consts::OS.to_string(),
        cpu_cores,
        memory_bytes,
        ip_address: local_ip().unwrap_or_else(|| "127.0.0.1".to_string()),
    }
}

/// Address of the interface that routes outward. Connecting a UDP
/// socket sends nothing.
fn local_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

/// Credential cached between agent runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub node_id: String,
    pub api_key: String,
}

impl Credentials {
    /// Load cached credentials; a missing file is `None`.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let creds = serde_json::from_str(&raw)
            .with_context(|| format!("invalid credentials file {}", path.display()))?;
        Ok(Some(creds))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// The agent that keeps one node registered and reporting.
pub struct NodeAgent {
    client: RpcClient,
    settings: AgentSettings,
    metrics: Arc<dyn MetricsSource>,
    api_key: Option<String>,
}

impl NodeAgent {
    pub fn new(client: RpcClient, settings: AgentSettings, metrics: Arc<dyn MetricsSource>) -> Self {
        Self {
            client,
            settings,
            metrics,
            api_key: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.settings.node_id
    }

    /// Credential in use (None until registered).
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Register with the coordinator, retrying at the configured delay
    /// until it succeeds or shutdown is signalled.
    pub async fn register(&mut self, shutdown: &mut watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            match self.try_register().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        node_id = %self.settings.node_id,
                        error = %e,
                        retry_in = ?self.settings.retry_delay,
                        "registration failed"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.retry_delay) => {}
                _ = shutdown.changed() => bail!("shutdown before registration completed"),
            }
        }
    }

    async fn try_register(&mut self) -> anyhow::Result<()> {
        let cached = Credentials::load(&self.settings.credentials_path)?
            .filter(|c| c.node_id == self.settings.node_id)
            .map(|c| c.api_key);

        let resp = self
            .client
            .register_node(&RegisterNodeRequest {
                node_id: self.settings.node_id.clone(),
                metadata: self.settings.metadata.clone(),
                api_key: cached.clone(),
            })
            .await?;
        if !resp.success {
            bail!("coordinator rejected registration: {}", resp.message);
        }

        let api_key = match (resp.api_key, cached) {
            (Some(issued), _) => {
                Credentials {
                    node_id: self.settings.node_id.clone(),
                    api_key: issued.clone(),
                }
                .save(&self.settings.credentials_path)?;
                info!(node_id = %self.settings.node_id, "registered, credential saved");
                issued
            }
            (None, Some(cached)) => {
                info!(node_id = %self.settings.node_id, "reconnected");
                cached
            }
            (None, None) => bail!("coordinator issued no credential"),
        };
        self.api_key = Some(api_key);
        Ok(())
    }

    /// Send one heartbeat.
    pub async fn heartbeat_once(&self) -> anyhow::Result<()> {
        let api_key = self
            .api_key
            .clone()
            .context("not registered, call register() first")?;

        let resp = self
            .client
            .heartbeat(&HeartbeatRequest {
                node_id: self.settings.node_id.clone(),
                api_key,
                metrics: self.metrics.collect(),
                server_statuses: self.metrics.server_statuses(),
            })
            .await?;
        if !resp.success {
            bail!("heartbeat rejected: {}", resp.message);
        }
        Ok(())
    }

    /// Heartbeat at the configured interval until shutdown.
    pub async fn run_heartbeat(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let node_id = &self.settings.node_id;
        info!(%node_id, interval = ?self.settings.heartbeat_interval, "heartbeat loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.heartbeat_interval) => {
                    match self.heartbeat_once().await {
                        Ok(()) => debug!(%node_id, "heartbeat sent"),
                        Err(e) => warn!(%node_id, error = %e, "heartbeat failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(%node_id, "heartbeat loop shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::rpc::{HEARTBEAT, REGISTER_NODE};

    #[derive(Default)]
    struct Coordinator {
        register_failures: AtomicUsize,
        registrations: Mutex<Vec<Value>>,
        heartbeats: Mutex<Vec<Value>>,
    }

    async fn register(
        State(c): State<Arc<Coordinator>>,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, StatusCode> {
        if c.register_failures.load(Ordering::SeqCst) > 0 {
            c.register_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        let reconnect = body.get("api_key").is_some();
        c.registrations.lock().unwrap().push(body);
        if reconnect {
            Ok(Json(json!({"success": true, "message": "Node reconnected successfully"})))
        } else {
            Ok(Json(json!({"success": true, "message": "Node registered successfully", "api_key": "key-test"})))
        }
    }

    async fn heartbeat(State(c): State<Arc<Coordinator>>, Json(body): Json<Value>) -> Json<Value> {
        c.heartbeats.lock().unwrap().push(body);
        Json(json!({"success": true, "message": "Heartbeat received"}))
    }

    async fn spawn_coordinator(state: Arc<Coordinator>) -> RpcClient {
        let app = Router::new()
            .route(REGISTER_NODE, post(register))
            .route(HEARTBEAT, post(heartbeat))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        RpcClient::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap()
    }

    struct FixedMetrics;

    impl MetricsSource for FixedMetrics {
        fn collect(&self) -> SystemMetrics {
            SystemMetrics {
                cpu_usage: 0.1,
                cpu_cores: 2,
                ..SystemMetrics::default()
            }
        }
    }

    fn settings(dir: &Path) -> AgentSettings {
        AgentSettings {
            node_id: "n1".to_string(),
            metadata: NodeMetadata {
                hostname: "host-a".to_string(),
                cpu_cores: 2,
                ..NodeMetadata::default()
            },
            heartbeat_interval: Duration::from_millis(20),
            retry_delay: Duration::from_millis(10),
            credentials_path: dir.join("creds.json"),
        }
    }

    #[tokio::test]
    async fn test_register_saves_and_reuses_credential() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(Coordinator::default());
        let client = spawn_coordinator(coordinator.clone()).await;
        let (_tx, mut rx) = watch::channel(false);

        let mut agent = NodeAgent::new(client.clone(), settings(dir.path()), Arc::new(FixedMetrics));
        agent.register(&mut rx).await.unwrap();
        assert_eq!(agent.api_key(), Some("key-test"));

        let saved = Credentials::load(&dir.path().join("creds.json")).unwrap().unwrap();
        assert_eq!(saved.api_key, "key-test");

        let mut restarted = NodeAgent::new(client, settings(dir.path()), Arc::new(FixedMetrics));
        restarted.register(&mut rx).await.unwrap();
        assert_eq!(restarted.api_key(), Some("key-test"));

        let registrations = coordinator.registrations.lock().unwrap().clone();
        assert_eq!(registrations.len(), 2);
        assert!(registrations[0].get("api_key").is_none());
        assert_eq!(registrations[1]["api_key"], "key-test");
        assert_eq!(registrations[1]["hostname"], "host-a");
    }

    #[tokio::test]
    async fn test_register_retries_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(Coordinator {
            register_failures: AtomicUsize::new(2),
            ..Coordinator::default()
        });
        let client = spawn_coordinator(coordinator.clone()).await;
        let (_tx, mut rx) = watch::channel(false);

        let mut agent = NodeAgent::new(client, settings(dir.path()), Arc::new(FixedMetrics));
        agent.register(&mut rx).await.unwrap();
        assert_eq!(coordinator.register_failures.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.registrations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_gives_up_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let client = RpcClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let (tx, mut rx) = watch::channel(false);

        let mut agent = NodeAgent::new(client, settings(dir.path()), Arc::new(FixedMetrics));
        let handle = tokio::spawn(async move { agent.register(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_reports_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(Coordinator::default());
        let client = spawn_coordinator(coordinator.clone()).await;
        let (tx, mut rx) = watch::channel(false);

        let mut agent = NodeAgent::new(client, settings(dir.path()), Arc::new(FixedMetrics));
        assert!(agent.heartbeat_once().await.is_err());
        agent.register(&mut rx).await.unwrap();

        let agent = Arc::new(agent);
        let loop_agent = Arc::clone(&agent);
        let handle = tokio::spawn(async move { loop_agent.run_heartbeat(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let heartbeats = coordinator.heartbeats.lock().unwrap().clone();
        assert!(!heartbeats.is_empty());
        assert_eq!(heartbeats[0]["node_id"], "n1");
        assert_eq!(heartbeats[0]["api_key"], "key-test");
        assert_eq!(heartbeats[0]["metrics"]["cpu_usage"], 0.1);
    }

    #[test]
    fn test_meminfo_parsing() {
        let meminfo = "MemTotal:       16318440 kB\nMemFree:         1000000 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(meminfo_field(meminfo, "MemTotal:"), Some(16318440 * 1024));
        assert_eq!(meminfo_field(meminfo, "MemAvailable:"), Some(8000000 * 1024));
        assert_eq!(meminfo_field(meminfo, "SwapTotal:"), None);
    }

    #[test]
    fn test_settings_default_node_id_to_hostname() {
        let config = AgentConfig {
            node_id: None,
            ..AgentConfig::default()
        };
        let settings = AgentSettings::from_config(&config);
        assert_eq!(settings.node_id, settings.metadata.hostname);
        assert_eq!(settings.retry_delay, Duration::from_secs(5));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
    }
}
