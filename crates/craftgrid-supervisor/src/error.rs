//! Supervisor error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while starting or controlling a process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("launch script not found at {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("failed to prepare {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn server process: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
