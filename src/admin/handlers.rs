use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::props::Properties;
use crate::registry::ConnectionState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub schema: String,
    pub instance_id: String,
}

#[derive(Serialize)]
pub struct DataSourceStatus {
    pub name: String,
    pub host: Option<String>,
    pub closed: bool,
    pub active_leases: usize,
    pub max_pool_size: usize,
}

#[derive(Serialize)]
pub struct ReplicaGroupStatus {
    pub name: String,
    pub primary: String,
    pub replicas: Vec<String>,
    pub disabled: Vec<String>,
    pub available: Vec<String>,
}

#[derive(Serialize)]
pub struct SnapshotStatus {
    pub schema: String,
    pub version: u64,
    pub tables: Vec<String>,
    pub data_sources: Vec<DataSourceStatus>,
    pub replica_groups: Vec<ReplicaGroupStatus>,
    pub props: Properties,
}

#[derive(Serialize)]
pub struct RegistryStatus {
    pub connection: ConnectionState,
    pub watches: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if state.runtime.is_closed() { "closed" } else { "operational" },
        schema: state.runtime.schema().to_string(),
        instance_id: state.runtime.facade().instance_id().to_string(),
    })
}

pub async fn get_snapshot(State(state): State<AdminState>) -> Json<SnapshotStatus> {
    // One load for the whole response
    let snapshot = state.runtime.current();
    let rule = snapshot.rule();

    let data_sources = snapshot
        .data_sources()
        .values()
        .map(|pool| DataSourceStatus {
            name: pool.name().to_string(),
            host: pool.url().host_str().map(str::to_string),
            closed: pool.is_closed(),
            active_leases: pool.active_leases(),
            max_pool_size: pool.max_size(),
        })
        .collect();

    let replica_groups = rule
        .replica_groups()
        .iter()
        .map(|group| ReplicaGroupStatus {
            name: group.name().to_string(),
            primary: group.primary().to_string(),
            replicas: group.replicas().to_vec(),
            disabled: group.disabled_names(),
            available: group.available_replicas(),
        })
        .collect();

    Json(SnapshotStatus {
        schema: snapshot.schema().to_string(),
        version: snapshot.version(),
        tables: rule.config().logic_tables().into_iter().map(str::to_string).collect(),
        data_sources,
        replica_groups,
        props: snapshot.props().clone(),
    })
}

pub async fn get_registry(State(state): State<AdminState>) -> Json<RegistryStatus> {
    let facade = state.runtime.facade();
    Json(RegistryStatus {
        connection: facade.repository().state(),
        watches: facade.watch_count(),
    })
}
