//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use shard_orchestrator::config::{OrchestrationConfig, RepositoryConfig};
use shard_orchestrator::datasource::{DataSourceConfiguration, DataSourceFactory, PoolFactory, PooledDataSource};
use shard_orchestrator::orchestration::codec::DataSourceConfigurations;
use shard_orchestrator::orchestration::{OrchestrationFacade, SchemaConfiguration};
use shard_orchestrator::props::Properties;
use shard_orchestrator::registry::{CoordinationRepository, CoordinationServer, RemoteRepository, ServerOptions};
use shard_orchestrator::rule::{ReplicaGroupConfiguration, RuleConfiguration, TableRuleConfiguration};
use shard_orchestrator::{OrchestrationError, OrchestrationResult};

pub const SCHEMA: &str = "sharding_db";
pub const NAMESPACE: &str = "orchestration_test";

/// Start an embedded coordination server on an ephemeral port.
pub async fn start_registry() -> CoordinationServer {
    let options = ServerOptions {
        reap_interval: Duration::from_millis(20),
        ..Default::default()
    };
    CoordinationServer::bind("127.0.0.1:0", options).await.unwrap()
}

/// Client settings tuned for fast tests.
pub fn repository_config(server: &CoordinationServer) -> RepositoryConfig {
    RepositoryConfig {
        server_lists: server.local_addr().to_string(),
        retry_interval_ms: 20,
        max_retries: 3,
        time_to_live_secs: 0,
        operation_timeout_ms: 2000,
        ..Default::default()
    }
}

pub async fn connect(server: &CoordinationServer) -> Arc<RemoteRepository> {
    Arc::new(RemoteRepository::init(repository_config(server)).await.unwrap())
}

pub async fn connect_dyn(server: &CoordinationServer) -> Arc<dyn CoordinationRepository> {
    connect(server).await
}

pub fn orchestration_config(overwrite: bool) -> OrchestrationConfig {
    OrchestrationConfig {
        namespace: Some(NAMESPACE.to_string()),
        schema: SCHEMA.to_string(),
        overwrite,
    }
}

pub async fn facade(server: &CoordinationServer, overwrite: bool) -> OrchestrationFacade {
    OrchestrationFacade::new(orchestration_config(overwrite), connect_dyn(server).await)
}

pub fn data_source(database: &str) -> DataSourceConfiguration {
    DataSourceConfiguration::new(format!("mysql://127.0.0.1:3306/{}", database))
}

pub fn data_sources(names: &[&str]) -> DataSourceConfigurations {
    names.iter().map(|name| (name.to_string(), data_source(name))).collect()
}

/// Rule over `ds_0`/`ds_1` with a read/write group `rw` = primary `ds_0`,
/// replicas `ds_0_r0`, `ds_0_r1`.
pub fn sample_rule() -> RuleConfiguration {
    RuleConfiguration {
        tables: vec![TableRuleConfiguration::new("t_order", "ds_${0..1}.t_order_${0..1}")],
        binding_tables: Vec::new(),
        default_data_source: Some("ds_0".to_string()),
        replica_groups: vec![ReplicaGroupConfiguration::new("rw", "ds_0", &["ds_0_r0", "ds_0_r1"])],
    }
}

pub fn sample_schema() -> SchemaConfiguration {
    SchemaConfiguration {
        rule: sample_rule(),
        data_sources: data_sources(&["ds_0", "ds_1", "ds_0_r0", "ds_0_r1"]),
        props: Properties::new().with("sql.show", "false"),
        disabled: Default::default(),
    }
}

/// Opens real pools and remembers every open; can be told to fail names.
#[derive(Default)]
pub struct RecordingFactory {
    opened: Mutex<Vec<Arc<PooledDataSource>>>,
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn opened(&self) -> Vec<Arc<PooledDataSource>> {
        self.opened.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Pools opened so far that have not been closed.
    pub fn live(&self) -> usize {
        self.opened.lock().iter().filter(|pool| !pool.is_closed()).count()
    }
}

impl DataSourceFactory for RecordingFactory {
    fn open(&self, name: &str, config: &DataSourceConfiguration) -> OrchestrationResult<Arc<PooledDataSource>> {
        if self.failing.lock().contains(name) {
            return Err(OrchestrationError::data_source(name, "injected failure"));
        }
        let pool = PoolFactory.open(name, config)?;
        self.opened.lock().push(pool.clone());
        Ok(pool)
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `future` with a bounded wait so a hung test fails instead of stalling.
pub async fn bounded<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("operation timed out")
}
