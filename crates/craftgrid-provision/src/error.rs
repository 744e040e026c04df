//! Provisioning error types.

use std::path::PathBuf;

use craftgrid_state::ProvisionStage;
use thiserror::Error;

/// Errors raised while fetching a server artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("artifact not found at {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Errors that abort a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to create server directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to download server jar: {0}")]
    Download(#[from] FetchError),

    #[error("failed to write {file}: {source}")]
    WriteFile {
        file: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// The stage that failed.
    pub fn stage(&self) -> ProvisionStage {
        match self {
            ProvisionError::CreateDir { .. } => ProvisionStage::Setup,
            ProvisionError::Download(_) => ProvisionStage::Download,
            ProvisionError::WriteFile { file, .. } if *file == crate::files::SERVER_JAR => {
                ProvisionStage::Download
            }
            ProvisionError::WriteFile { .. } => ProvisionStage::Config,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
