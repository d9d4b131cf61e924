//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the embedded coordination server when configured
//! - Build the runtime, fresh from the registry or adopting a local file
//! - Bind the admin listener once the runtime is serving
//! - Tear everything down in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and undoes what already started
//! - Subsystems initialize in order, not concurrently
//! - The admin listener starts last (requests only when ready)

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::OrchestratorConfig;
use crate::datasource::{DataSourceFactory, PoolFactory};
use crate::lifecycle::shutdown::Shutdown;
use crate::orchestration::SchemaConfiguration;
use crate::registry::{CoordinationServer, ServerOptions};
use crate::runtime::{OrchestrationDataSource, RuntimeSnapshot, RuntimeSource};

pub type StartupError = Box<dyn std::error::Error + Send + Sync>;

/// Everything the daemon runs.
pub struct Orchestrator {
    runtime: OrchestrationDataSource,
    registry: Option<CoordinationServer>,
    admin: Option<JoinHandle<()>>,
    shutdown: Shutdown,
}

impl Orchestrator {
    /// Start with the default pool factory.
    pub async fn start(
        config: &OrchestratorConfig,
        adopt: Option<SchemaConfiguration>,
    ) -> Result<Self, StartupError> {
        Self::start_with_factory(config, adopt, Arc::new(PoolFactory)).await
    }

    pub async fn start_with_factory(
        config: &OrchestratorConfig,
        adopt: Option<SchemaConfiguration>,
        factory: Arc<dyn DataSourceFactory>,
    ) -> Result<Self, StartupError> {
        let registry = if config.embedded_registry.enabled {
            let options = ServerOptions {
                digest: config.embedded_registry.digest.clone(),
                ..Default::default()
            };
            Some(CoordinationServer::bind(&config.embedded_registry.bind_address, options).await?)
        } else {
            None
        };

        let source = match adopt {
            Some(local) => {
                let snapshot = RuntimeSnapshot::build(&config.orchestration.schema, &local, factory.as_ref())?;
                tracing::info!(
                    schema = %config.orchestration.schema,
                    data_sources = snapshot.data_sources().len(),
                    overwrite = config.orchestration.overwrite,
                    "Adopting local schema configuration"
                );
                RuntimeSource::AdoptExisting(snapshot)
            }
            None => RuntimeSource::FreshBootstrap,
        };
        let runtime = OrchestrationDataSource::connect(config, source, factory).await?;

        let shutdown = Shutdown::new();
        let admin = if config.admin.enabled {
            match serve_admin(config, runtime.clone(), &shutdown).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    runtime.close().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            runtime,
            registry,
            admin,
            shutdown,
        })
    }

    pub fn runtime(&self) -> &OrchestrationDataSource {
        &self.runtime
    }

    /// The embedded coordination server, when one was started.
    pub fn registry(&self) -> Option<&CoordinationServer> {
        self.registry.as_ref()
    }

    /// Stop the admin listener, close the runtime, stop the embedded server.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        if let Some(admin) = self.admin {
            if let Err(e) = admin.await {
                tracing::warn!(error = %e, "Admin task ended abnormally");
            }
        }
        self.runtime.close().await;
        if let Some(registry) = self.registry {
            registry.shutdown();
        }
        tracing::info!("Shutdown complete");
    }
}

async fn serve_admin(
    config: &OrchestratorConfig,
    runtime: OrchestrationDataSource,
    shutdown: &Shutdown,
) -> Result<JoinHandle<()>, StartupError> {
    if config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
        tracing::warn!("Admin API uses the placeholder api_key");
    }
    let listener = TcpListener::bind(&config.admin.bind_address).await?;
    let local_addr = listener.local_addr()?;
    let router = setup_admin_router(AdminState::new(runtime, &config.admin.api_key));
    let mut stop = shutdown.subscribe();

    tracing::info!(address = %local_addr, "Admin API listening");
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Admin API failed");
        }
    }))
}
