//! Physical connection pool handle.
//!
//! # Responsibilities
//! - Represent one live physical data source
//! - Bound concurrent leases at the configured pool size
//! - Refuse new leases once closed
//!
//! # Design Decisions
//! - Lease accounting is a single atomic counter; `ConnectionLease` gives it
//!   back on drop
//! - Closing does not wait for outstanding leases; holders finish on the
//!   handle they already have

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::datasource::DataSourceConfiguration;
use crate::error::{OrchestrationError, OrchestrationResult};

/// Relaxed ordering is enough; ids only need to be unique.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of an opened pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PoolId(u64);

impl PoolId {
    pub fn new() -> Self {
        Self(POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// A live pool for one named data source.
#[derive(Debug)]
pub struct PooledDataSource {
    id: PoolId,
    name: String,
    config: DataSourceConfiguration,
    url: Url,
    /// Maximum concurrent leases.
    max_size: usize,
    active: AtomicUsize,
    closed: AtomicBool,
}

impl PooledDataSource {
    pub fn new(name: impl Into<String>, config: DataSourceConfiguration, url: Url) -> Self {
        let max_size = config.max_pool_size.max(1);
        Self {
            id: PoolId::new(),
            name: name.into(),
            config,
            url,
            max_size,
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DataSourceConfiguration {
        &self.config
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Leases currently held.
    pub fn active_leases(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Take a connection slot.
    pub fn lease(self: &Arc<Self>) -> OrchestrationResult<ConnectionLease> {
        if self.is_closed() {
            return Err(OrchestrationError::data_source(&self.name, "pool is closed"));
        }
        let mut prev = self.active.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_size {
                return Err(OrchestrationError::data_source(
                    &self.name,
                    format!("pool exhausted ({} leases)", self.max_size),
                ));
            }
            match self
                .active
                .compare_exchange_weak(prev, prev + 1, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Ok(ConnectionLease { pool: self.clone() })
    }

    /// Close the pool. Returns true for the call that closed it.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!(
                data_source = %self.name,
                pool = %self.id,
                active_leases = self.active_leases(),
                "Data source pool closed"
            );
        }
        first
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A held connection slot; released on drop.
#[derive(Debug)]
pub struct ConnectionLease {
    pool: Arc<PooledDataSource>,
}

impl Deref for ConnectionLease {
    type Target = PooledDataSource;
    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.pool.release();
    }
}
