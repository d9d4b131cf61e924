//! Orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! Registry watch → decoder.rs (WatchNotification → ChangeEvent)
//!     → facade.rs (ordering, view tracking)
//!     → bus.rs (per-kind subscribers, registration order)
//!     → runtime::OrchestrationDataSource
//!
//! Startup: config_center.rs (load) → facade bootstrap / adopt → start
//! ```
//!
//! # Design Decisions
//! - The key layout lives in `node.rs` only
//! - Values are JSON documents (`codec.rs`); nothing else in the crate
//!   knows the stored format

pub mod bus;
pub mod codec;
pub mod config_center;
pub mod decoder;
pub mod event;
pub mod facade;
pub mod node;
pub mod schema;

pub use bus::{EventBus, PublishOutcome, Subscriber, SubscriptionId};
pub use config_center::ConfigCenter;
pub use decoder::ChangeDecoder;
pub use event::{ChangeEvent, EventKind};
pub use facade::OrchestrationFacade;
pub use node::OrchestrationNode;
pub use schema::SchemaConfiguration;
