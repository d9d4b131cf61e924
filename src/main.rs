//! Shard orchestrator daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────┐
//!                   │              SHARD ORCHESTRATOR               │
//!                   │                                               │
//!   Coordination    │  ┌────────────┐   ┌────────────┐   ┌────────┐ │
//!   store ──────────┼─▶│  registry  │──▶│orchestration──▶│ runtime│ │
//!   (watches)       │  │   client   │   │  decoder   │   │snapshot│ │
//!                   │  └────────────┘   │  + bus     │   └───┬────┘ │
//!                   │                   └────────────┘       │      │
//!                   │                                        ▼      │
//!   Operators ◀─────┼──── admin API ◀──────────── pools, rule, props│
//!                   │                                               │
//!                   │  config · observability · resilience · lifecycle
//!                   └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use shard_orchestrator::config::loader::{load_config, load_toml};
use shard_orchestrator::lifecycle::signals::wait_for_shutdown_signal;
use shard_orchestrator::lifecycle::Orchestrator;
use shard_orchestrator::observability::{logging, metrics};
use shard_orchestrator::{OrchestratorConfig, SchemaConfiguration};

#[derive(Parser)]
#[command(name = "shard-orchestrator")]
#[command(about = "Keeps a sharding runtime in step with its coordination store", long_about = None)]
struct Args {
    /// Path to the orchestrator config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local schema file to adopt and push instead of bootstrapping
    #[arg(long)]
    adopt: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => OrchestratorConfig::default(),
    };

    logging::init_tracing(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "shard-orchestrator starting");

    tracing::info!(
        schema = %config.orchestration.schema,
        namespace = ?config.orchestration.namespace,
        servers = %config.registry.server_lists,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let adopt = match &args.adopt {
        Some(path) => Some(load_toml::<SchemaConfiguration>(path)?),
        None => None,
    };

    let orchestrator = Orchestrator::start(&config, adopt).await?;
    wait_for_shutdown_signal().await;
    orchestrator.shutdown().await;
    Ok(())
}
