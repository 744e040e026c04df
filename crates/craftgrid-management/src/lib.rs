//! craftgrid-management: the coordinator's view of the external
//! management API.
//!
//! The coordinator pushes node and server status upstream and looks up
//! declared server configuration before provisioning. [`ManagementApi`]
//! is the seam; [`HttpManagementClient`] talks to the real service and
//! [`NoopManagement`] stands in when the integration is disabled.

pub mod client;
pub mod error;
pub mod payload;

pub use client::{HttpManagementClient, ManagementApi, NoopManagement};
pub use error::{ManagementError, ManagementResult};
pub use payload::{derived_progress, MetricsPayload, NodeStatusUpdate, ServerStatusUpdate};
