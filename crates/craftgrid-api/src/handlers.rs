//! HTTP handlers.
//!
//! RPC handlers are thin: deserialize, call [`FleetService`], serialize.
//! REST handlers wrap their payload in [`ApiResponse`].
//!
//! [`FleetService`]: craftgrid_cluster::FleetService

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use craftgrid_cluster::rpc::{
    HeartbeatRequest, ProvisionServerRequest, ProvisionServerResponse, RegisterNodeRequest,
    RegisterNodeResponse, RpcReply, ServerOperationRequest, ServerStatusResponse,
    UpdatePluginsRequest,
};
use craftgrid_state::ErrorKind;

use crate::ApiState;

/// Response wrapper for the REST view.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Nodes ──────────────────────────────────────────────────────

/// POST /rpc/v1/register_node
pub async fn register_node(
    State(state): State<ApiState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Json<RegisterNodeResponse> {
    Json(state.service.register_node(req).await)
}

/// POST /rpc/v1/heartbeat
pub async fn heartbeat(
    State(state): State<ApiState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<RpcReply> {
    Json(state.service.heartbeat(req).await)
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.service.list_nodes().await)
}

/// GET /api/v1/nodes/{id}
pub async fn get_node(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.membership().get_node(&id).await {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    }
}

// ── Servers ────────────────────────────────────────────────────

/// POST /rpc/v1/provision_server
pub async fn provision_server(
    State(state): State<ApiState>,
    Json(req): Json<ProvisionServerRequest>,
) -> Json<ProvisionServerResponse> {
    Json(state.service.provision_server(req).await)
}

/// POST /rpc/v1/start_server
pub async fn start_server(
    State(state): State<ApiState>,
    Json(req): Json<ServerOperationRequest>,
) -> Json<RpcReply> {
    Json(state.service.start_server(req).await)
}

/// POST /rpc/v1/stop_server
pub async fn stop_server(
    State(state): State<ApiState>,
    Json(req): Json<ServerOperationRequest>,
) -> Json<RpcReply> {
    Json(state.service.stop_server(req).await)
}

/// POST /rpc/v1/delete_server
pub async fn delete_server(
    State(state): State<ApiState>,
    Json(req): Json<ServerOperationRequest>,
) -> Json<RpcReply> {
    Json(state.service.delete_server(req).await)
}

/// POST /rpc/v1/update_plugins
pub async fn update_plugins(
    State(state): State<ApiState>,
    Json(req): Json<UpdatePluginsRequest>,
) -> Json<RpcReply> {
    Json(state.service.update_plugins(req).await)
}

/// POST /rpc/v1/get_server_status
pub async fn get_server_status(
    State(state): State<ApiState>,
    Json(req): Json<ServerOperationRequest>,
) -> Json<ServerStatusResponse> {
    Json(state.service.get_server_status(req).await)
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}
