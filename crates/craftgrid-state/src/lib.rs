//! craftgrid-state: shared fleet domain types.
//!
//! Holds the data model every other crate speaks: nodes and their
//! metrics, server instances and their lifecycle status, the error
//! taxonomy returned by fleet operations, and credential issuance.
//!
//! All types are plain data (`Clone` + serde) so snapshots can leave the
//! registry lock and cross task boundaries freely.

pub mod credential;
pub mod error;
pub mod types;

pub use credential::{credentials_match, generate_api_key};
pub use error::{ErrorKind, FleetError, FleetResult};
pub use types::*;
