//! craftgrid-api: HTTP surface of the coordinator.
//!
//! Every fleet RPC is a JSON `POST` under `/rpc/v1`. Expected failures
//! come back as HTTP 200 with `success: false`; only malformed bodies are
//! rejected by axum itself. A small read-only REST view sits under
//! `/api/v1`.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/rpc/v1/register_node` | Register or reconnect a node |
//! | POST | `/rpc/v1/heartbeat` | Liveness, metrics and server report |
//! | POST | `/rpc/v1/provision_server` | Provision a server instance |
//! | POST | `/rpc/v1/start_server` | Start a server process |
//! | POST | `/rpc/v1/stop_server` | Stop a server process |
//! | POST | `/rpc/v1/delete_server` | Delete a server instance |
//! | POST | `/rpc/v1/update_plugins` | Not implemented |
//! | POST | `/rpc/v1/get_server_status` | Current server status |
//! | GET | `/api/v1/nodes` | List nodes |
//! | GET | `/api/v1/nodes/{id}` | Get one node |
//! | GET | `/healthz` | Liveness probe |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use craftgrid_cluster::rpc;
use craftgrid_cluster::FleetService;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: FleetService,
}

/// Build the complete router (RPC + REST).
pub fn build_router(service: FleetService) -> Router {
    let state = ApiState { service };

    let rpc_routes = Router::new()
        .route(rpc::REGISTER_NODE, post(handlers::register_node))
        .route(rpc::HEARTBEAT, post(handlers::heartbeat))
        .route(rpc::PROVISION_SERVER, post(handlers::provision_server))
        .route(rpc::START_SERVER, post(handlers::start_server))
        .route(rpc::STOP_SERVER, post(handlers::stop_server))
        .route(rpc::DELETE_SERVER, post(handlers::delete_server))
        .route(rpc::UPDATE_PLUGINS, post(handlers::update_plugins))
        .route(rpc::GET_SERVER_STATUS, post(handlers::get_server_status));

    let api_routes = Router::new()
        .route("/nodes", get(handlers::list_nodes))
        .route("/nodes/{id}", get(handlers::get_node));

    rpc_routes
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
