//! craftgrid-cluster: the fleet control plane.
//!
//! Tracks worker nodes and the game-server instances they host, drives
//! provisioning and process lifecycle, and keeps the external
//! management API in sync.
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── FleetService (RPC surface)
//!   │   ├── MembershipManager → register / heartbeat / list
//!   │   └── Orchestrator      → provision / start / stop / delete / status
//!   │       ├── Provisioner (setup → download → config, progress events)
//!   │       └── ProcessSupervisor (one handle per running server)
//!   ├── Registry (single RwLock, shared by everything above)
//!   └── Reconciler
//!       ├── liveness sweep   (online ↔ offline)
//!       ├── state sync       → management API
//!       └── metrics sync     → management API
//!
//! Agent Node
//!   └── NodeAgent
//!       ├── registers (fixed retry delay, cached credential)
//!       └── sends periodic heartbeats
//! ```

pub mod agent;
pub mod membership;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;
pub mod rpc;
pub mod service;

pub use agent::{AgentSettings, HostMetrics, MetricsSource, NodeAgent};
pub use membership::{MembershipManager, Registration};
pub use orchestrator::{Orchestrator, StatusChange};
pub use reconcile::{ReconcileIntervals, Reconciler};
pub use registry::{Registry, SharedRegistry};
pub use rpc::RpcClient;
pub use service::FleetService;
