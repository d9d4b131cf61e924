//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Embedded registry → Runtime (bootstrap or adopt) → Admin listener
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → return to the daemon
//!
//! Shutdown (shutdown.rs):
//!     trigger → admin drains → runtime closes watches and pools
//!             → registry session released → embedded server stops
//! ```
//!
//! # Design Decisions
//! - Ordered startup: registry first, then runtime, then listeners
//! - Ordered shutdown: the reverse

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Orchestrator, StartupError};
