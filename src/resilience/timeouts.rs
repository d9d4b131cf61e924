//! Timeout enforcement for registry calls.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A configured timeout of zero selects the client default, never "wait forever"
//! - Timeout errors are distinct from connectivity errors

use std::future::Future;
use std::time::Duration;

use crate::registry::error::{RegistryError, RegistryResult};

/// Timeout applied when the configuration asks for the client default.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;

/// Resolve the configured operation timeout.
pub fn operation_timeout(configured_ms: u64) -> Duration {
    if configured_ms == 0 {
        Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS)
    } else {
        Duration::from_millis(configured_ms)
    }
}

/// Run `fut` with a deadline, mapping expiry to `RegistryError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> RegistryResult<T>
where
    F: Future<Output = RegistryResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::Timeout(limit)),
    }
}
