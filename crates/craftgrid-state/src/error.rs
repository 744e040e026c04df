//! Error taxonomy for fleet operations.

use thiserror::Error;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors returned by registry and lifecycle operations.
///
/// Every variant is an expected failure: the RPC layer turns it into a
/// `success = false` response carrying the display string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("dependency failure: {0}")]
    DependencyFailure(String),

    #[error("process failure: {0}")]
    ProcessFailure(String),
}

/// Coarse classification of a [`FleetError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Unauthorized,
    Conflict,
    DependencyFailure,
    ProcessFailure,
}

impl FleetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FleetError::NotFound(_) => ErrorKind::NotFound,
            FleetError::Unauthorized(_) => ErrorKind::Unauthorized,
            FleetError::Conflict(_) => ErrorKind::Conflict,
            FleetError::DependencyFailure(_) => ErrorKind::DependencyFailure,
            FleetError::ProcessFailure(_) => ErrorKind::ProcessFailure,
        }
    }
}
