//! Physical data sources.
//!
//! # Data Flow
//! ```text
//! DataSourceConfiguration (registry value)
//!     → DataSourceFactory::open → Arc<PooledDataSource> (pool.rs)
//!     → owned by a RuntimeSnapshot
//!     → DataSourceDiff (diff.rs) decides reuse, replace or close on change
//! ```
//!
//! # Design Decisions
//! - Pool handles are compared by identity (`Arc::ptr_eq`), configurations by value
//! - The factory is a trait so tests can count opens and inject failures

pub mod diff;
pub mod pool;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OrchestrationError, OrchestrationResult};

pub use diff::DataSourceDiff;
pub use pool::{ConnectionLease, PoolId, PooledDataSource};

/// Live pools by logical name.
pub type DataSourceMap = BTreeMap<String, Arc<PooledDataSource>>;

/// Declarative description of one physical data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfiguration {
    pub url: String,
    pub driver: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
    pub min_idle: usize,
    pub connection_timeout_ms: u64,
}

impl Default for DataSourceConfiguration {
    fn default() -> Self {
        Self {
            url: String::new(),
            driver: "mysql".to_string(),
            username: "root".to_string(),
            password: String::new(),
            max_pool_size: 10,
            min_idle: 1,
            connection_timeout_ms: 30_000,
        }
    }
}

impl DataSourceConfiguration {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Opens pools for data-source configurations.
pub trait DataSourceFactory: Send + Sync {
    fn open(&self, name: &str, config: &DataSourceConfiguration) -> OrchestrationResult<Arc<PooledDataSource>>;
}

/// Default factory: validates the configuration and sizes the pool.
#[derive(Debug, Default, Clone)]
pub struct PoolFactory;

impl DataSourceFactory for PoolFactory {
    fn open(&self, name: &str, config: &DataSourceConfiguration) -> OrchestrationResult<Arc<PooledDataSource>> {
        let url = Url::parse(&config.url)
            .map_err(|e| OrchestrationError::data_source(name, format!("invalid url '{}': {}", config.url, e)))?;
        if url.host_str().is_none() {
            return Err(OrchestrationError::data_source(name, "url has no host"));
        }
        if config.max_pool_size == 0 {
            return Err(OrchestrationError::data_source(name, "max_pool_size must be at least 1"));
        }
        if config.min_idle > config.max_pool_size {
            return Err(OrchestrationError::data_source(
                name,
                format!("min_idle {} exceeds max_pool_size {}", config.min_idle, config.max_pool_size),
            ));
        }

        let pool = Arc::new(PooledDataSource::new(name, config.clone(), url));
        tracing::info!(
            data_source = %name,
            pool = %pool.id(),
            max_pool_size = config.max_pool_size,
            "Data source pool opened"
        );
        Ok(pool)
    }
}

/// Open every configuration, closing what was opened if any fails.
pub fn open_all<'a, I>(factory: &dyn DataSourceFactory, configs: I) -> OrchestrationResult<DataSourceMap>
where
    I: IntoIterator<Item = (&'a String, &'a DataSourceConfiguration)>,
{
    let mut opened = DataSourceMap::new();
    for (name, config) in configs {
        match factory.open(name, config) {
            Ok(pool) => {
                opened.insert(name.clone(), pool);
            }
            Err(e) => {
                for pool in opened.values() {
                    pool.close();
                }
                return Err(e);
            }
        }
    }
    Ok(opened)
}
