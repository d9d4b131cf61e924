//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → OrchestratorConfig (validated, immutable)
//!     → handed to the registry client, admin API and runtime at startup
//! ```
//!
//! # Design Decisions
//! - Local config is immutable once loaded; the live sharding configuration
//!   comes from the registry, not from this file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::OrchestratorConfig;
pub use schema::OrchestrationConfig;
pub use schema::RepositoryConfig;
pub use schema::EmbeddedRegistryConfig;
pub use schema::AdminConfig;
pub use schema::ObservabilityConfig;
