//! RPC surface tests.
//!
//! Drives the coordinator router in-process with `oneshot`, the way the
//! daemon wires it: real registry, real provisioner against a local
//! artifact mirror, real supervisor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use craftgrid_api::build_router;
use craftgrid_cluster::{FleetService, MembershipManager, Orchestrator, Registry};
use craftgrid_management::NoopManagement;
use craftgrid_provision::{DirectoryArtifactFetcher, Provisioner};
use craftgrid_supervisor::{ProcessSupervisor, SupervisorConfig};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct Coordinator {
    _dir: TempDir,
    servers: PathBuf,
    router: Router,
}

fn coordinator() -> Coordinator {
    let dir = tempfile::tempdir().unwrap();
    let servers = dir.path().join("servers");
    let mirror = dir.path().join("mirror");
    std::fs::create_dir_all(mirror.join("1.20")).unwrap();
    std::fs::write(mirror.join("1.20").join("server.jar"), b"jar").unwrap();

    let registry = Registry::shared();
    let management = Arc::new(NoopManagement);
    let membership = Arc::new(MembershipManager::new(registry.clone(), management.clone()));
    let orchestrator = Orchestrator::new(
        registry,
        Provisioner::new(&servers, Arc::new(DirectoryArtifactFetcher::new(mirror))),
        ProcessSupervisor::new(SupervisorConfig::default()),
        management,
        Duration::from_secs(5),
    );
    let router = build_router(FleetService::new(membership, orchestrator));

    Coordinator {
        _dir: dir,
        servers,
        router,
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn post(router: &Router, path: &str, body: Value) -> Value {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let (status, body) = send(router, req).await;
    assert_eq!(status, StatusCode::OK, "{path}: {body}");
    body
}

async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(path).body(Body::empty()).unwrap();
    send(router, req).await
}

async fn register(router: &Router, node_id: &str) -> String {
    let resp = post(
        router,
        "/rpc/v1/register_node",
        json!({
            "node_id": node_id,
            "hostname": "host-a",
            "os": "linux",
            "cpu_cores": 4,
            "memory_bytes": 8589934592u64,
            "ip_address": "10.0.0.1"
        }),
    )
    .await;
    assert_eq!(resp["success"], true, "{resp}");
    resp["api_key"].as_str().unwrap().to_string()
}

fn op(node_id: &str, key: &str, server_id: &str) -> Value {
    json!({"node_id": node_id, "api_key": key, "server_id": server_id})
}

#[tokio::test]
async fn register_reconnect_and_reject() {
    let c = coordinator();
    let key = register(&c.router, "n1").await;
    assert!(key.starts_with("key-"));

    let resp = post(
        &c.router,
        "/rpc/v1/register_node",
        json!({"node_id": "n1", "hostname": "host-a", "api_key": key}),
    )
    .await;
    assert_eq!(resp["success"], true);
    assert!(resp.get("api_key").is_none());

    let resp = post(
        &c.router,
        "/rpc/v1/register_node",
        json!({"node_id": "n1", "hostname": "host-a", "api_key": "stolen"}),
    )
    .await;
    assert_eq!(resp["success"], false);
    assert!(resp["message"].as_str().unwrap().contains("unauthorized"));

    let resp = post(&c.router, "/rpc/v1/register_node", json!({"node_id": ""})).await;
    assert_eq!(resp["success"], false);
    assert!(resp["message"].as_str().unwrap().contains("invalid argument"));
}

#[tokio::test]
async fn heartbeat_updates_node_listing() {
    let c = coordinator();

    let resp = post(
        &c.router,
        "/rpc/v1/heartbeat",
        json!({"node_id": "n1", "api_key": "nope"}),
    )
    .await;
    assert_eq!(resp["success"], false);
    assert!(resp["message"].as_str().unwrap().contains("not found"));

    let key = register(&c.router, "n1").await;
    let resp = post(
        &c.router,
        "/rpc/v1/heartbeat",
        json!({
            "node_id": "n1",
            "api_key": key,
            "metrics": {"cpu_usage": 0.1},
            "server_statuses": [
                {"server_id": "srv9", "status": "running", "player_count": 4},
                {"server_id": "", "status": "running"}
            ]
        }),
    )
    .await;
    assert_eq!(resp["success"], true, "{resp}");

    let (status, body) = get(&c.router, "/api/v1/nodes").await;
    assert_eq!(status, StatusCode::OK);
    let nodes = body["data"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["id"], "n1");
    assert_eq!(nodes[0]["status"], "online");
    assert_eq!(nodes[0]["metrics"]["cpu_usage"], 0.1);
    assert!(nodes[0].get("api_key").is_none());
    let servers = nodes[0]["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["player_count"], 4);

    let (status, _) = get(&c.router, "/api/v1/nodes/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn provision_status_and_delete() {
    let c = coordinator();
    let key = register(&c.router, "n1").await;

    let resp = post(
        &c.router,
        "/rpc/v1/provision_server",
        json!({"node_id": "n1", "api_key": key, "server_id": "srv1", "version": "1.20"}),
    )
    .await;
    assert_eq!(resp["success"], true, "{resp}");
    assert_eq!(resp["instance_id"], "srv1");
    assert!(c.servers.join("srv1").join("eula.txt").exists());

    let resp = post(&c.router, "/rpc/v1/get_server_status", op("n1", &key, "srv1")).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["status"], "provisioned");

    let resp = post(&c.router, "/rpc/v1/stop_server", op("n1", &key, "srv1")).await;
    assert_eq!(resp["success"], false);
    assert!(resp["message"].as_str().unwrap().contains("not running"));

    let resp = post(&c.router, "/rpc/v1/delete_server", op("n1", &key, "srv1")).await;
    assert_eq!(resp["success"], true, "{resp}");
    assert!(!c.servers.join("srv1").exists());

    let resp = post(&c.router, "/rpc/v1/delete_server", op("n1", &key, "srv1")).await;
    assert_eq!(resp["success"], false);
    assert!(resp["message"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn provision_unknown_version_fails_in_body() {
    let c = coordinator();
    let key = register(&c.router, "n1").await;

    let resp = post(
        &c.router,
        "/rpc/v1/provision_server",
        json!({"node_id": "n1", "api_key": key, "server_id": "srv1", "version": "9.99"}),
    )
    .await;
    assert_eq!(resp["success"], false);
    assert!(resp["message"].as_str().unwrap().contains("Failed to provision server"));

    let resp = post(&c.router, "/rpc/v1/get_server_status", op("n1", &key, "srv1")).await;
    assert_eq!(resp["status"], "failed");
}

#[tokio::test]
async fn update_plugins_is_not_implemented() {
    let c = coordinator();
    let key = register(&c.router, "n1").await;

    let resp = post(
        &c.router,
        "/rpc/v1/update_plugins",
        json!({
            "node_id": "n1",
            "api_key": key,
            "server_id": "srv1",
            "plugins": [{"name": "worldedit", "version": "7.2"}]
        }),
    )
    .await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["message"], "Plugin updates not implemented yet");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let c = coordinator();
    let req = Request::builder()
        .method("POST")
        .uri("/rpc/v1/heartbeat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&c.router, req).await;
    assert!(status.is_client_error());

    let (status, _) = get(&c.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
}

#[cfg(unix)]
#[tokio::test]
async fn start_and_stop_over_rpc() {
    let c = coordinator();
    let key = register(&c.router, "n1").await;

    let resp = post(
        &c.router,
        "/rpc/v1/provision_server",
        json!({"node_id": "n1", "api_key": key, "server_id": "srv1", "version": "1.20"}),
    )
    .await;
    assert_eq!(resp["success"], true, "{resp}");
    write_script(
        &c.servers.join("srv1"),
        "#!/bin/bash\necho 'Done (0.5s)!'\nwhile read -r line; do [ \"$line\" = stop ] && exit 0; done\n",
    );

    let resp = post(&c.router, "/rpc/v1/start_server", op("n1", &key, "srv1")).await;
    assert_eq!(resp["success"], true, "{resp}");
    let resp = post(&c.router, "/rpc/v1/start_server", op("n1", &key, "srv1")).await;
    assert_eq!(resp["success"], false);
    assert!(resp["message"].as_str().unwrap().contains("already running"));

    let resp = post(&c.router, "/rpc/v1/get_server_status", op("n1", &key, "srv1")).await;
    assert_eq!(resp["status"], "running");

    let resp = post(&c.router, "/rpc/v1/stop_server", op("n1", &key, "srv1")).await;
    assert_eq!(resp["success"], true, "{resp}");
    let resp = post(&c.router, "/rpc/v1/get_server_status", op("n1", &key, "srv1")).await;
    assert_eq!(resp["status"], "stopped");
}

#[cfg(unix)]
fn write_script(dir: &Path, script: &str) {
    std::fs::write(dir.join("start.sh"), script).unwrap();
}
