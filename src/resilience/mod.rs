//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Registry call:
//!     → timeouts.rs (bound the call by the operation timeout)
//!     → On connection loss: retries.rs (retry with backoff per policy)
//!     → backoff.rs (exponential delay + jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every registry call has a deadline
//! - Jittered backoff prevents reconnect storms against the store

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
