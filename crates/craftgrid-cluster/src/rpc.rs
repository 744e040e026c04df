//! RPC message types, routes and the HTTP client used by agents.
//!
//! Every call is a JSON `POST` to a path under `/rpc/v1`. Expected
//! failures are reported in the body (`success = false` plus a message),
//! never as transport errors.

use std::time::Duration;

use anyhow::Context;
use craftgrid_state::{NodeMetadata, Plugin, ServerState, SystemMetrics};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const REGISTER_NODE: &str = "/rpc/v1/register_node";
pub const HEARTBEAT: &str = "/rpc/v1/heartbeat";
pub const PROVISION_SERVER: &str = "/rpc/v1/provision_server";
pub const START_SERVER: &str = "/rpc/v1/start_server";
pub const STOP_SERVER: &str = "/rpc/v1/stop_server";
pub const DELETE_SERVER: &str = "/rpc/v1/delete_server";
pub const UPDATE_PLUGINS: &str = "/rpc/v1/update_plugins";
pub const GET_SERVER_STATUS: &str = "/rpc/v1/get_server_status";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    #[serde(flatten)]
    pub metadata: NodeMetadata,
    /// Previously issued credential, when reconnecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterNodeResponse {
    pub success: bool,
    pub message: String,
    /// Present only when a credential was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub api_key: String,
    #[serde(default)]
    pub metrics: SystemMetrics,
    #[serde(default)]
    pub server_statuses: Vec<ServerState>,
}

/// Reply for calls that only report success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    pub success: bool,
    pub message: String,
}

impl RpcReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionServerRequest {
    pub node_id: String,
    pub api_key: String,
    pub server_id: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionServerResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub instance_id: String,
}

/// Body for start, stop, delete and status calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOperationRequest {
    pub node_id: String,
    pub api_key: String,
    pub server_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePluginsRequest {
    pub node_id: String,
    pub api_key: String,
    pub server_id: String,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatusResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub instance_id: String,
    pub status: String,
}

/// JSON-over-HTTP client for the coordinator's RPC surface.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    base_url: String,
}

impl RpcClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build RPC client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<Req, Resp>(&self, path: &str, req: &Req) -> anyhow::Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} rejected the request"))?;
        resp.json()
            .await
            .with_context(|| format!("invalid response from {url}"))
    }

    pub async fn register_node(&self, req: &RegisterNodeRequest) -> anyhow::Result<RegisterNodeResponse> {
        self.call(REGISTER_NODE, req).await
    }

    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> anyhow::Result<RpcReply> {
        self.call(HEARTBEAT, req).await
    }

    pub async fn provision_server(
        &self,
        req: &ProvisionServerRequest,
    ) -> anyhow::Result<ProvisionServerResponse> {
        self.call(PROVISION_SERVER, req).await
    }

    pub async fn start_server(&self, req: &ServerOperationRequest) -> anyhow::Result<RpcReply> {
        self.call(START_SERVER, req).await
    }

    pub async fn stop_server(&self, req: &ServerOperationRequest) -> anyhow::Result<RpcReply> {
        self.call(STOP_SERVER, req).await
    }

    pub async fn delete_server(&self, req: &ServerOperationRequest) -> anyhow::Result<RpcReply> {
        self.call(DELETE_SERVER, req).await
    }

    pub async fn update_plugins(&self, req: &UpdatePluginsRequest) -> anyhow::Result<RpcReply> {
        self.call(UPDATE_PLUGINS, req).await
    }

    pub async fn get_server_status(
        &self,
        req: &ServerOperationRequest,
    ) -> anyhow::Result<ServerStatusResponse> {
        self.call(GET_SERVER_STATUS, req).await
    }
}
