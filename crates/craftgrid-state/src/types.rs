//! Domain types for the craftgrid fleet.
//!
//! These types describe nodes, their metrics, and the server instances
//! they host. They double as RPC payloads, so all of them serialize to
//! JSON with snake_case field names.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a node, chosen by the node itself.
pub type NodeId = String;

/// Identifier for a server instance, scoped to its owning node.
pub type ServerId = String;

// ── Node ──────────────────────────────────────────────────────────

/// Liveness of a node as derived by the liveness sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }
}

/// Host facts a node reports when it registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetadata {
    pub hostname: String,
    pub os: String,
    pub cpu_cores: u32,
    pub memory_bytes: u64,
    pub ip_address: String,
}

/// Opaque host metrics snapshot carried by heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemMetrics {
    /// CPU utilisation, 0.0–1.0 or percent, as the node reports it.
    pub cpu_usage: f64,
    pub cpu_cores: u32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_usage: f64,
    pub network_bytes_in: u64,
    pub network_bytes_out: u64,
}

impl SystemMetrics {
    /// The all-zero snapshot pushed upstream when a node first registers.
    pub fn initial(cpu_cores: u32, memory_total: u64) -> Self {
        Self {
            cpu_cores,
            memory_total,
            ..Self::default()
        }
    }
}

/// Read-only view of a registered node (credential excluded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    #[serde(flatten)]
    pub metadata: NodeMetadata,
    pub status: NodeStatus,
    /// Unix timestamp of the last registration or heartbeat.
    pub last_seen: u64,
    pub metrics: Option<SystemMetrics>,
    pub servers: Vec<ServerState>,
}

// ── Server ────────────────────────────────────────────────────────

/// Stages of the provisioning pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    Setup,
    Download,
    Config,
}

impl ProvisionStage {
    pub const ALL: [ProvisionStage; 3] = [
        ProvisionStage::Setup,
        ProvisionStage::Download,
        ProvisionStage::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStage::Setup => "setup",
            ProvisionStage::Download => "download",
            ProvisionStage::Config => "config",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "setup" => Some(ProvisionStage::Setup),
            "download" => Some(ProvisionStage::Download),
            "config" => Some(ProvisionStage::Config),
            _ => None,
        }
    }
}

/// Lifecycle status of a server instance.
///
/// Serialized as its wire string (`provisioning_download`, `running`, ...).
/// Heartbeats may report statuses this coordinator does not know; those
/// are kept verbatim in [`ServerStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ServerStatus {
    Provisioning,
    ProvisioningStage(ProvisionStage),
    Provisioned,
    Failed,
    Running,
    Stopping,
    Stopped,
    Error,
    Other(String),
}

impl ServerStatus {
    /// True while a provisioning attempt is in flight.
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            ServerStatus::Provisioning | ServerStatus::ProvisioningStage(_)
        )
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Provisioning => f.write_str("provisioning"),
            ServerStatus::ProvisioningStage(stage) => write!(f, "provisioning_{}", stage.as_str()),
            ServerStatus::Provisioned => f.write_str("provisioned"),
            ServerStatus::Failed => f.write_str("failed"),
            ServerStatus::Running => f.write_str("running"),
            ServerStatus::Stopping => f.write_str("stopping"),
            ServerStatus::Stopped => f.write_str("stopped"),
            ServerStatus::Error => f.write_str("error"),
            ServerStatus::Other(s) => f.write_str(s),
        }
    }
}

impl FromStr for ServerStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "provisioning" => ServerStatus::Provisioning,
            "provisioned" => ServerStatus::Provisioned,
            "failed" => ServerStatus::Failed,
            "running" => ServerStatus::Running,
            "stopping" => ServerStatus::Stopping,
            "stopped" => ServerStatus::Stopped,
            "error" => ServerStatus::Error,
            other => match other
                .strip_prefix("provisioning_")
                .and_then(ProvisionStage::parse)
            {
                Some(stage) => ServerStatus::ProvisioningStage(stage),
                None => ServerStatus::Other(other.to_string()),
            },
        })
    }
}

impl From<String> for ServerStatus {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl From<ServerStatus> for String {
    fn from(status: ServerStatus) -> Self {
        status.to_string()
    }
}

/// Observed state of one server instance.
///
/// Heartbeats carry these verbatim; the orchestrator keeps one per
/// instance in the node's server map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    #[serde(default)]
    pub server_id: ServerId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub status: ServerStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub player_count: u32,
    /// Set once the process printed a readiness marker.
    #[serde(default)]
    pub ready: bool,
}

impl ServerState {
    /// A freshly requested instance.
    pub fn provisioning(server_id: &str, name: &str, version: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            status: ServerStatus::Provisioning,
            message: "Starting server provisioning".to_string(),
            player_count: 0,
            ready: false,
        }
    }
}

/// Plugin descriptor accepted by `UpdatePlugins`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub download_url: String,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
