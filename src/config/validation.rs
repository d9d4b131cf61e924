//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and address formats
//! - Reject namespace/schema names that would produce invalid registry paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: OrchestratorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::OrchestratorConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn error(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field,
        message: message.into(),
    }
}

fn is_path_segment(value: &str) -> bool {
    !value.is_empty() && !value.contains('/') && !value.chars().any(char::is_whitespace)
}

/// Check the configuration, collecting every violation.
pub fn validate_config(config: &OrchestratorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_path_segment(&config.orchestration.schema) {
        errors.push(error(
            "orchestration.schema",
            "must be a non-empty name without '/' or whitespace",
        ));
    }
    if let Some(namespace) = &config.orchestration.namespace {
        if !is_path_segment(namespace) {
            errors.push(error(
                "orchestration.namespace",
                "must be a non-empty name without '/' or whitespace",
            ));
        }
    }

    if config.registry.kind.trim().is_empty() {
        errors.push(error("registry.type", "must not be empty"));
    }
    let servers = config.registry.servers();
    if servers.is_empty() {
        errors.push(error("registry.server_lists", "must list at least one server"));
    }
    for server in &servers {
        if !server.contains(':') {
            errors.push(error(
                "registry.server_lists",
                format!("'{}' is not a host:port pair", server),
            ));
        }
    }
    if let Some(digest) = &config.registry.digest {
        if digest.is_empty() {
            errors.push(error("registry.digest", "must not be empty when set"));
        }
    }

    if config.embedded_registry.enabled
        && config.embedded_registry.bind_address.parse::<SocketAddr>().is_err()
    {
        errors.push(error(
            "embedded_registry.bind_address",
            format!("'{}' is not a socket address", config.embedded_registry.bind_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(error(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(error("admin.api_key", "must not be empty when admin is enabled"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(error(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&OrchestratorConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = OrchestratorConfig::default();
        config.orchestration.schema = "bad/schema".into();
        config.registry.server_lists = "nohost".into();
        config.admin.enabled = true;
        config.admin.bind_address = "nope".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["orchestration.schema", "registry.server_lists", "admin.bind_address"]
        );
    }

    #[test]
    fn test_empty_server_list() {
        let mut config = OrchestratorConfig::default();
        config.registry.server_lists = " , ".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].to_string(), "registry.server_lists: must list at least one server");
    }
}
