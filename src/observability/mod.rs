//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! registry client   → connection state, reconnects ─┐
//! orchestration bus → events by kind and outcome ───┼→ metrics.rs → Prometheus scrape
//! runtime           → snapshot version, open pools ─┘
//!
//! every subsystem   → tracing events → logging.rs (EnvFilter) → stdout
//! ```
//!
//! # Design Decisions
//! - Log events carry `schema`, `path`, `data_source` and `version` as fields
//! - Recording never fails and costs an atomic update when nothing listens

pub mod logging;
pub mod metrics;
