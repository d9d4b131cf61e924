//! Registry error definitions.

use std::time::Duration;
use thiserror::Error;

use crate::registry::protocol::Failure;

/// Errors surfaced by a coordination repository.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The coordination store could not be reached within the retry budget.
    #[error("Coordination store unreachable: {0}")]
    Connectivity(String),

    /// A single operation exceeded the configured operation timeout.
    #[error("Registry operation timed out after {0:?}")]
    Timeout(Duration),

    /// The repository was closed.
    #[error("Registry repository is closed")]
    Closed,

    /// The server rejected the authentication digest.
    #[error("Registry rejected the authentication digest")]
    Unauthorized,

    /// The path is not a valid registry path.
    #[error("Invalid registry path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// The repository type tag is not known.
    #[error("Unsupported registry type: {0}")]
    UnsupportedType(String),

    /// The peer sent something the protocol does not allow.
    #[error("Registry protocol error: {0}")]
    Protocol(String),

    /// Socket-level failure.
    #[error("Registry I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Whether the error may clear up by retrying against the same store.
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Connectivity(_) | RegistryError::Io(_))
    }
}

impl From<Failure> for RegistryError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Unauthorized => RegistryError::Unauthorized,
            Failure::InvalidPath { path, reason } => RegistryError::Protocol(format!(
                "server rejected path '{}': {}",
                path, reason
            )),
            Failure::SessionExpired => {
                RegistryError::Connectivity("session expired".to_string())
            }
            Failure::NoSession => RegistryError::Connectivity("no active session".to_string()),
            Failure::Malformed(reason) => RegistryError::Protocol(reason),
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
