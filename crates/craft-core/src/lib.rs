pub mod config;
pub mod source;
pub mod types;

pub use config::CraftConfig;
pub use source::ArtifactSource;
pub use types::*;
