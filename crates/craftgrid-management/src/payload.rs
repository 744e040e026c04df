//! Request bodies sent to the management API (camelCase on the wire).

use craftgrid_state::{NodeStatus, ProvisionStage, ServerState, ServerStatus, SystemMetrics};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPayload {
    pub cpu_usage: f64,
    pub cpu_cores: u32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_usage: f64,
    pub network_bytes_in: u64,
    pub network_bytes_out: u64,
}

impl From<&SystemMetrics> for MetricsPayload {
    fn from(m: &SystemMetrics) -> Self {
        Self {
            cpu_usage: m.cpu_usage,
            cpu_cores: m.cpu_cores,
            memory_used: m.memory_used,
            memory_total: m.memory_total,
            disk_usage: m.disk_usage,
            network_bytes_in: m.network_bytes_in,
            network_bytes_out: m.network_bytes_out,
        }
    }
}

/// Body of `PUT /api/nodes/{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusUpdate {
    pub status: String,
    /// Unix seconds.
    pub last_seen: u64,
    pub metrics: MetricsPayload,
    /// Set on the first push after registration so the panel learns the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl NodeStatusUpdate {
    pub fn new(status: NodeStatus, last_seen: u64, metrics: &SystemMetrics) -> Self {
        Self {
            status: status.as_str().to_string(),
            last_seen,
            metrics: metrics.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }
}

/// Body of `PUT /api/servers/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusUpdate {
    pub status: String,
    pub player_count: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl From<&ServerState> for ServerStatusUpdate {
    /// The instance's own message wins; the status-derived one fills gaps.
    fn from(state: &ServerState) -> Self {
        let (message, progress) = derived_progress(&state.status);
        Self {
            status: state.status.to_string(),
            player_count: state.player_count,
            message: if state.message.is_empty() {
                message.unwrap_or_default()
            } else {
                state.message.clone()
            },
            progress,
        }
    }
}

/// Panel-facing message and progress percentage for a status.
pub fn derived_progress(status: &ServerStatus) -> (Option<String>, Option<u8>) {
    match status {
        ServerStatus::Provisioning => (Some("Starting server provisioning...".into()), Some(0)),
        ServerStatus::ProvisioningStage(stage) => {
            let progress = match stage {
                ProvisionStage::Setup => 20,
                ProvisionStage::Download => 50,
                ProvisionStage::Config => 80,
            };
            (
                Some(format!("Provisioning server: {}", stage.as_str())),
                Some(progress),
            )
        }
        ServerStatus::Provisioned => (Some("Server provisioned successfully".into()), Some(100)),
        ServerStatus::Failed => (Some("Server provisioning failed".into()), None),
        ServerStatus::Running => (Some("Server is running".into()), None),
        ServerStatus::Stopped => (Some("Server is stopped".into()), None),
        ServerStatus::Stopping | ServerStatus::Error | ServerStatus::Other(_) => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progress() {
        let progress = |s| derived_progress(&s).1;
        assert_eq!(progress(ServerStatus::Provisioning), Some(0));
        assert_eq!(progress(ServerStatus::ProvisioningStage(ProvisionStage::Setup)), Some(20));
        assert_eq!(progress(ServerStatus::ProvisioningStage(ProvisionStage::Download)), Some(50));
        assert_eq!(progress(ServerStatus::ProvisioningStage(ProvisionStage::Config)), Some(80));
        assert_eq!(progress(ServerStatus::Provisioned), Some(100));
        assert_eq!(progress(ServerStatus::Running), None);
    }

    #[test]
    fn test_server_update_body() {
        let mut state = ServerState::provisioning("srv1", "Lobby", "1.20");
        state.status = ServerStatus::ProvisioningStage(ProvisionStage::Download);
        state.message = String::new();

        let body = serde_json::to_value(ServerStatusUpdate::from(&state)).unwrap();
        assert_eq!(body["status"], "provisioning_download");
        assert_eq!(body["playerCount"], 0);
        assert_eq!(body["message"], "Provisioning server: download");
        assert_eq!(body["progress"], 50);
    }

    #[test]
    fn test_instance_message_wins() {
        let mut state = ServerState::provisioning("srv1", "Lobby", "1.20");
        state.status = ServerStatus::Failed;
        state.message = "failed to download server jar: connection refused".into();

        let update = ServerStatusUpdate::from(&state);
        assert_eq!(update.message, state.message);
        assert_eq!(update.progress, None);
        let body = serde_json::to_value(&update).unwrap();
        assert!(body.get("progress").is_none());
    }

    #[test]
    fn test_node_update_body() {
        let metrics = SystemMetrics::initial(8, 16 << 30);
        let update = NodeStatusUpdate::new(NodeStatus::Online, 1_700_000_000, &metrics)
            .with_api_key("key-abc");
        let body = serde_json::to_value(&update).unwrap();
        assert_eq!(body["status"], "online");
        assert_eq!(body["lastSeen"], 1_700_000_000u64);
        assert_eq!(body["metrics"]["cpuCores"], 8);
        assert_eq!(body["apiKey"], "key-abc");

        let without = NodeStatusUpdate::new(NodeStatus::Offline, 1, &metrics);
        assert!(serde_json::to_value(&without).unwrap().get("apiKey").is_none());
    }
}
