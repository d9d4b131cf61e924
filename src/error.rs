//! Orchestration error definitions.

use thiserror::Error;

use crate::registry::RegistryError;

/// Errors raised while bootstrapping or applying configuration changes.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// No usable rule configuration; the schema cannot route.
    #[error("Rule configuration missing for schema '{0}'")]
    ConfigurationMissing(String),

    /// A rule configuration is present but unusable.
    #[error("Invalid rule configuration: {0}")]
    InvalidRule(String),

    /// A watch payload could not be decoded into a domain object.
    #[error("Malformed change at '{path}': {reason}")]
    MalformedChange { path: String, reason: String },

    /// A physical data source could not be opened or leased.
    #[error("Data source '{name}' failed: {reason}")]
    DataSource { name: String, reason: String },

    /// A value could not be encoded for the registry.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The runtime was closed.
    #[error("Orchestration runtime is closed")]
    Closed,

    /// Repository failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl OrchestrationError {
    pub fn data_source(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        OrchestrationError::DataSource {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for orchestration operations.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
