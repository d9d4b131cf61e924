//! Admin API.
//!
//! Read-only views of the running orchestrator behind a bearer token:
//! `/admin/status`, `/admin/snapshot` and `/admin/registry`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::runtime::OrchestrationDataSource;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state of the admin router.
#[derive(Clone)]
pub struct AdminState {
    pub runtime: OrchestrationDataSource,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(runtime: OrchestrationDataSource, api_key: &str) -> Self {
        Self {
            runtime,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/snapshot", get(get_snapshot))
        .route("/admin/registry", get(get_registry))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
