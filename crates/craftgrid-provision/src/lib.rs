//! craftgrid-provision: materialises a launch-ready server installation.
//!
//! The pipeline runs three stages in order, reporting progress on a
//! channel as it goes:
//!
//! 1. **setup**: create `<servers_dir>/<server_id>`
//! 2. **download**: fetch `server.jar` for the requested version
//! 3. **config**: write `server.properties`, `eula.txt` and the launch script
//!
//! Every stage overwrites what is already on disk. A failed stage aborts
//! the run and leaves earlier stages' output in place.

pub mod error;
pub mod fetch;
pub mod files;
pub mod pipeline;

pub use error::{FetchError, FetchResult, ProvisionError, ProvisionResult};
pub use fetch::{fetcher_for, ArtifactFetcher, DirectoryArtifactFetcher, HttpArtifactFetcher};
pub use pipeline::{ProvisionEvent, ProvisionOutcome, ProvisionRequest, Provisioner};
