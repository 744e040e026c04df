//! craftgrid.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CraftConfig {
    pub coordinator: CoordinatorConfig,
    pub management: ManagementConfig,
    pub artifacts: ArtifactsConfig,
    pub agent: AgentConfig,
}

/// Settings for the control-plane process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address the RPC surface listens on.
    pub listen: String,
    /// Root directory holding one sub-directory per server instance.
    pub servers_dir: PathBuf,
    pub liveness_interval_secs: u64,
    /// A node unseen for longer than this is flagged offline.
    pub offline_threshold_secs: u64,
    pub state_sync_interval_secs: u64,
    pub metrics_sync_interval_secs: u64,
    /// Grace period between the stop command and a forced kill.
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagementConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// `http(s)://` download service or `file://` local mirror.
    pub source: String,
    /// Java executable embedded in generated launch scripts.
    pub java_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub coordinator_url: String,
    pub node_id: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub retry_delay_secs: u64,
    /// Where the issued credential is cached between agent restarts.
    pub credentials_path: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:50051".to_string(),
            servers_dir: PathBuf::from("./servers"),
            liveness_interval_secs: 10,
            offline_threshold_secs: 60,
            state_sync_interval_secs: 30,
            metrics_sync_interval_secs: 60,
            stop_timeout_secs: 30,
        }
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:3000".to_string(),
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            source: "http://localhost:3000".to_string(),
            java_path: "java".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:50051".to_string(),
            node_id: None,
            heartbeat_interval_secs: 30,
            retry_delay_secs: 5,
            credentials_path: std::env::temp_dir().join("craftgrid-agent.json"),
        }
    }
}

impl CoordinatorConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(self.offline_threshold_secs)
    }

    pub fn state_sync_interval(&self) -> Duration {
        Duration::from_secs(self.state_sync_interval_secs)
    }

    pub fn metrics_sync_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_sync_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl CraftConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path` if given, otherwise fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
