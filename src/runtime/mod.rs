//! Hot-reload runtime.
//!
//! `snapshot.rs` defines the immutable bundle readers hold; `data_source.rs`
//! owns the current one and swaps it as change events arrive.

pub mod data_source;
pub mod snapshot;

pub use data_source::{OrchestrationDataSource, RuntimeSource};
pub use snapshot::RuntimeSnapshot;
