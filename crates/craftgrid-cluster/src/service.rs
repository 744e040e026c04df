//! RPC service: maps requests onto membership and orchestrator calls.
//!
//! Transport-agnostic: the HTTP layer deserializes a request, calls the
//! matching method here and serializes whatever comes back. Every
//! [`FleetError`] becomes a `success = false` reply carrying its message.

use std::sync::Arc;

use craftgrid_state::{FleetError, NodeInfo};
use tracing::{info, warn};

use crate::membership::{MembershipManager, Registration};
use crate::orchestrator::Orchestrator;
use crate::rpc::{
    HeartbeatRequest, ProvisionServerRequest, ProvisionServerResponse, RegisterNodeRequest,
    RegisterNodeResponse, RpcReply, ServerOperationRequest, ServerStatusResponse,
    UpdatePluginsRequest,
};

#[derive(Clone)]
pub struct FleetService {
    membership: Arc<MembershipManager>,
    orchestrator: Orchestrator,
}

impl FleetService {
    pub fn new(membership: Arc<MembershipManager>, orchestrator: Orchestrator) -> Self {
        Self {
            membership,
            orchestrator,
        }
    }

    pub fn membership(&self) -> &Arc<MembershipManager> {
        &self.membership
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn register_node(&self, req: RegisterNodeRequest) -> RegisterNodeResponse {
        match self
            .membership
            .register(&req.node_id, req.metadata, req.api_key.as_deref())
            .await
        {
            Ok(Registration::Created { api_key }) => RegisterNodeResponse {
                success: true,
                message: "Node registered successfully".to_string(),
                api_key: Some(api_key),
            },
            Ok(Registration::Reconnected) => RegisterNodeResponse {
                success: true,
                message: "Node reconnected successfully".to_string(),
                api_key: None,
            },
            Err(e) => {
                rejected("register_node", &req.node_id, &e);
                RegisterNodeResponse {
                    success: false,
                    message: e.to_string(),
                    api_key: None,
                }
            }
        }
    }

    pub async fn heartbeat(&self, req: HeartbeatRequest) -> RpcReply {
        let result = self
            .membership
            .heartbeat(&req.node_id, &req.api_key, req.metrics, req.server_statuses)
            .await;
        reply("heartbeat", &req.node_id, result, "Heartbeat received")
    }

    pub async fn provision_server(&self, req: ProvisionServerRequest) -> ProvisionServerResponse {
        info!(node_id = %req.node_id, server_id = %req.server_id, version = %req.version, "provision requested");
        match self
            .orchestrator
            .provision_server(&req.node_id, &req.api_key, &req.server_id, &req.version)
            .await
        {
            Ok(instance_id) => ProvisionServerResponse {
                success: true,
                message: "Server provisioned successfully".to_string(),
                instance_id,
            },
            Err(e) => {
                rejected("provision_server", &req.node_id, &e);
                ProvisionServerResponse {
                    success: false,
                    message: e.to_string(),
                    instance_id: String::new(),
                }
            }
        }
    }

    pub async fn start_server(&self, req: ServerOperationRequest) -> RpcReply {
        let result = self
            .orchestrator
            .start_server(&req.node_id, &req.api_key, &req.server_id)
            .await;
        reply("start_server", &req.node_id, result, "Server started successfully")
    }

    pub async fn stop_server(&self, req: ServerOperationRequest) -> RpcReply {
        let result = self
            .orchestrator
            .stop_server(&req.node_id, &req.api_key, &req.server_id)
            .await;
        reply("stop_server", &req.node_id, result, "Server stopped successfully")
    }

    pub async fn delete_server(&self, req: ServerOperationRequest) -> RpcReply {
        let result = self
            .orchestrator
            .delete_server(&req.node_id, &req.api_key, &req.server_id)
            .await;
        reply("delete_server", &req.node_id, result, "Server deleted successfully")
    }

    /// Plugin management is not supported by this coordinator.
    pub async fn update_plugins(&self, req: UpdatePluginsRequest) -> RpcReply {
        warn!(
            node_id = %req.node_id,
            server_id = %req.server_id,
            plugins = req.plugins.len(),
            "plugin update requested but not implemented"
        );
        RpcReply::failed("Plugin updates not implemented yet")
    }

    pub async fn get_server_status(&self, req: ServerOperationRequest) -> ServerStatusResponse {
        match self
            .orchestrator
            .server_status(&req.node_id, &req.api_key, &req.server_id)
            .await
        {
            Ok(state) => ServerStatusResponse {
                success: true,
                message: state.message,
                instance_id: state.server_id,
                status: state.status.to_string(),
            },
            Err(e) => ServerStatusResponse {
                success: false,
                message: e.to_string(),
                instance_id: String::new(),
                status: "unknown".to_string(),
            },
        }
    }

    pub async fn list_nodes(&self) -> Vec<NodeInfo> {
        self.membership.list_nodes().await
    }
}

fn reply(op: &str, node_id: &str, result: Result<(), FleetError>, ok: &str) -> RpcReply {
    match result {
        Ok(()) => RpcReply::ok(ok),
        Err(e) => {
            rejected(op, node_id, &e);
            RpcReply::failed(e.to_string())
        }
    }
}

fn rejected(op: &str, node_id: &str, e: &FleetError) {
    warn!(op, %node_id, kind = ?e.kind(), error = %e, "request rejected");
}
