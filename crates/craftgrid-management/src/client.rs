//! Management API client.

use std::time::Duration;

use async_trait::async_trait;
use craft_core::ServerConfig;
use craft_core::config::ManagementConfig;
use serde::Serialize;
use tracing::debug;

use crate::error::{ManagementError, ManagementResult};
use crate::payload::{NodeStatusUpdate, ServerStatusUpdate};

/// Operations the coordinator performs against the management API.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// `PUT /api/nodes/{id}/status`.
    async fn update_node_status(
        &self,
        node_id: &str,
        update: &NodeStatusUpdate,
    ) -> ManagementResult<()>;

    /// `PUT /api/servers/{id}/status`.
    async fn update_server_status(
        &self,
        server_id: &str,
        update: &ServerStatusUpdate,
    ) -> ManagementResult<()>;

    /// `GET /api/servers/{id}/config`. `Ok(None)` when the panel has no
    /// configuration for this server.
    async fn fetch_server_config(&self, server_id: &str) -> ManagementResult<Option<ServerConfig>>;
}

/// reqwest-backed client.
pub struct HttpManagementClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpManagementClient {
    pub fn new(config: &ManagementConfig) -> ManagementResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ManagementError::Client)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn put_json<T>(&self, url: String, body: &T, bearer: bool) -> ManagementResult<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let mut req = self.client.put(&url).json(body);
        if bearer && !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await.map_err(|source| ManagementError::Request {
            url: url.clone(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ManagementError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        debug!(%url, status = status.as_u16(), "management update accepted");
        Ok(())
    }
}

#[async_trait]
impl ManagementApi for HttpManagementClient {
    async fn update_node_status(
        &self,
        node_id: &str,
        update: &NodeStatusUpdate,
    ) -> ManagementResult<()> {
        let url = format!("{}/api/nodes/{}/status", self.base_url, node_id);
        self.put_json(url, update, false).await
    }

    async fn update_server_status(
        &self,
        server_id: &str,
        update: &ServerStatusUpdate,
    ) -> ManagementResult<()> {
        let url = format!("{}/api/servers/{}/status", self.base_url, server_id);
        self.put_json(url, update, true).await
    }

    async fn fetch_server_config(&self, server_id: &str) -> ManagementResult<Option<ServerConfig>> {
        let url = format!("{}/api/servers/{}/config", self.base_url, server_id);
        let mut req = self.client.get(&url);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await.map_err(|source| ManagementError::Request {
            url: url.clone(),
            source,
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ManagementError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let config = resp
            .json::<ServerConfig>()
            .await
            .map_err(|source| ManagementError::Decode { url, source })?;
        Ok(Some(config))
    }
}

/// Accepts every push and knows no server configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopManagement;

#[async_trait]
impl ManagementApi for NoopManagement {
    async fn update_node_status(&self, _: &str, _: &NodeStatusUpdate) -> ManagementResult<()> {
        Ok(())
    }

    async fn update_server_status(&self, _: &str, _: &ServerStatusUpdate) -> ManagementResult<()> {
        Ok(())
    }

    async fn fetch_server_config(&self, _: &str) -> ManagementResult<Option<ServerConfig>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use craftgrid_state::{NodeStatus, ServerState, ServerStatus, SystemMetrics};
    use serde_json::{json, Value};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(String, Option<String>, Value)>>>);

    async fn record(
        State(captured): State<Captured>,
        Path(id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        captured.0.lock().unwrap().push((id, auth, body));
        StatusCode::OK
    }

    async fn config(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
        match id.as_str() {
            "srv1" => Ok(Json(json!({ "serverName": "Lobby", "maxPlayers": 64 }))),
            "broken" => Err(StatusCode::INTERNAL_SERVER_ERROR),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn spawn_panel() -> (HttpManagementClient, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route("/api/nodes/{id}/status", put(record))
            .route("/api/servers/{id}/status", put(record))
            .route("/api/servers/{id}/config", get(config))
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = HttpManagementClient::new(&ManagementConfig {
            enabled: true,
            base_url: format!("http://{addr}/"),
            api_key: "panel-secret".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        (client, captured)
    }

    #[tokio::test]
    async fn test_server_status_push_uses_bearer() {
        let (client, captured) = spawn_panel().await;
        let mut state = ServerState::provisioning("srv1", "Lobby", "1.20");
        state.status = ServerStatus::Running;
        state.player_count = 4;

        client
            .update_server_status("srv1", &ServerStatusUpdate::from(&state))
            .await
            .unwrap();

        let seen = captured.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let (id, auth, body) = &seen[0];
        assert_eq!(id, "srv1");
        assert_eq!(auth.as_deref(), Some("Bearer panel-secret"));
        assert_eq!(body["status"], "running");
        assert_eq!(body["playerCount"], 4);
    }

    #[tokio::test]
    async fn test_node_status_push() {
        let (client, captured) = spawn_panel().await;
        let update = NodeStatusUpdate::new(NodeStatus::Online, 42, &SystemMetrics::initial(4, 1024))
            .with_api_key("key-n1");

        client.update_node_status("n1", &update).await.unwrap();

        let seen = captured.0.lock().unwrap().clone();
        let (id, auth, body) = &seen[0];
        assert_eq!(id, "n1");
        assert!(auth.is_none());
        assert_eq!(body["apiKey"], "key-n1");
        assert_eq!(body["metrics"]["memoryTotal"], 1024);
    }

    #[tokio::test]
    async fn test_fetch_config() {
        let (client, _) = spawn_panel().await;

        let found = client.fetch_server_config("srv1").await.unwrap().unwrap();
        assert_eq!(found.server_name, "Lobby");
        assert_eq!(found.max_players, 64);
        assert_eq!(found.port, 25565);

        assert!(client.fetch_server_config("srv2").await.unwrap().is_none());

        let err = client.fetch_server_config("broken").await.unwrap_err();
        assert!(matches!(err, ManagementError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_panel() {
        let client = HttpManagementClient::new(&ManagementConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..ManagementConfig::default()
        })
        .unwrap();
        let err = client.fetch_server_config("srv1").await.unwrap_err();
        assert!(matches!(err, ManagementError::Request { .. }));
    }
}
