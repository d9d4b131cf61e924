//! Sharding-middleware orchestration library.
//!
//! A coordination repository client plus a hot-reload runtime that keeps one
//! schema's routing snapshot in step with the configuration stored there.

pub mod admin;
pub mod config;
pub mod datasource;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod orchestration;
pub mod props;
pub mod registry;
pub mod resilience;
pub mod rule;
pub mod runtime;

pub use config::schema::OrchestratorConfig;
pub use error::{OrchestrationError, OrchestrationResult};
pub use lifecycle::Shutdown;
pub use orchestration::{ChangeEvent, OrchestrationFacade, SchemaConfiguration};
pub use registry::{CoordinationRepository, CoordinationServer, RemoteRepository};
pub use runtime::{OrchestrationDataSource, RuntimeSnapshot, RuntimeSource};
