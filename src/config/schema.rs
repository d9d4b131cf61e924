//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! orchestrator. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Which schema is orchestrated and under which namespace.
    pub orchestration: OrchestrationConfig,

    /// Coordination store connection settings.
    pub registry: RepositoryConfig,

    /// Optional in-process coordination server.
    pub embedded_registry: EmbeddedRegistryConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Orchestration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Prefix for every registry path, e.g. "orchestration_ds".
    pub namespace: Option<String>,

    /// Logical schema this runtime orchestrates.
    pub schema: String,

    /// Whether an adopted local configuration replaces registry values.
    pub overwrite: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            schema: "logic_db".to_string(),
            overwrite: false,
        }
    }
}

/// Coordination repository configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Backend type tag.
    #[serde(rename = "type")]
    pub kind: String,

    /// Comma-separated `host:port` list.
    pub server_lists: String,

    /// Base delay between connection attempts.
    pub retry_interval_ms: u64,

    /// Extra connection attempts before giving up.
    pub max_retries: u32,

    /// Session time-to-live; 0 disables expiry-based ephemeral cleanup.
    pub time_to_live_secs: u64,

    /// Per-operation timeout; 0 selects the client default.
    pub operation_timeout_ms: u64,

    /// Authentication digest, e.g. "user:password".
    pub digest: Option<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            kind: "remote".to_string(),
            server_lists: "127.0.0.1:2181".to_string(),
            retry_interval_ms: 500,
            max_retries: 3,
            time_to_live_secs: 60,
            operation_timeout_ms: 500,
            digest: None,
        }
    }
}

impl RepositoryConfig {
    /// Server addresses, trimmed, empty entries removed.
    pub fn servers(&self) -> Vec<String> {
        self.server_lists
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Embedded coordination server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddedRegistryConfig {
    /// Start an in-process coordination server.
    pub enabled: bool,

    /// Bind address for the embedded server.
    pub bind_address: String,

    /// Digest clients must present.
    pub digest: Option<String>,
}

impl Default for EmbeddedRegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:2181".to_string(),
            digest: None,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            [registry]
            server_lists = "10.0.0.1:2181, 10.0.0.2:2181"
            time_to_live_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.kind, "remote");
        assert_eq!(config.registry.servers(), vec!["10.0.0.1:2181", "10.0.0.2:2181"]);
        assert_eq!(config.registry.time_to_live_secs, 0);
        assert_eq!(config.registry.max_retries, 3);
        assert_eq!(config.orchestration.schema, "logic_db");
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_type_tag_is_renamed() {
        let config: RepositoryConfig = toml::from_str(
            r#"
            type = "remote"
            server_lists = "127.0.0.1:3181"
            digest = "any"
            "#,
        )
        .unwrap();
        assert_eq!(config.digest.as_deref(), Some("any"));
    }
}
