//! Metrics collection and exposition.
//!
//! # Metrics
//! - `orchestration_events_total` (counter): change events by kind, outcome
//! - `orchestration_snapshot_version` (gauge): version of the current snapshot
//! - `orchestration_open_pools` (gauge): pools held by the current snapshot
//! - `registry_reconnects_total` (counter): connection losses
//! - `registry_connection_state` (gauge): 0=connecting 1=connected
//!   2=reconnecting 3=disconnected 4=closed
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter is installed only by the daemon

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::registry::ConnectionState;

pub const EVENTS_TOTAL: &str = "orchestration_events_total";
pub const SNAPSHOT_VERSION: &str = "orchestration_snapshot_version";
pub const OPEN_POOLS: &str = "orchestration_open_pools";
pub const RECONNECTS_TOTAL: &str = "registry_reconnects_total";
pub const CONNECTION_STATE: &str = "registry_connection_state";

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            register_metrics();
            tracing::info!(address = %addr, "Metrics endpoint listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        }
    }
}

fn register_metrics() {
    describe_counter!(EVENTS_TOTAL, "Change events by kind and outcome");
    describe_gauge!(SNAPSHOT_VERSION, "Version of the current runtime snapshot");
    describe_gauge!(OPEN_POOLS, "Data-source pools held by the current snapshot");
    describe_counter!(RECONNECTS_TOTAL, "Registry connection losses");
    describe_gauge!(CONNECTION_STATE, "Registry connection state code");
}

/// Count one change event. `outcome` is applied, failed or malformed.
pub fn record_event(kind: &'static str, outcome: &'static str) {
    counter!(EVENTS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn set_snapshot_version(version: u64) {
    gauge!(SNAPSHOT_VERSION).set(version as f64);
}

pub fn set_open_pools(count: usize) {
    gauge!(OPEN_POOLS).set(count as f64);
}

pub fn record_reconnect() {
    counter!(RECONNECTS_TOTAL).increment(1);
}

pub fn set_connection_state(state: &ConnectionState) {
    gauge!(CONNECTION_STATE).set(state.code());
}
