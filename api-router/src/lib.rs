#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{
    liveness::live,
    readiness::ready,
    sync::{cancel_sync, start_sync, sync_status},
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the coordinator API, version 1
pub fn api_routes_v1<S>(_app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let sync = Router::new()
        .route("/sync", post(start_sync))
        .route("/sync/{id}", get(sync_status))
        .route("/sync/{id}/cancel", post(cancel_sync));

    public.merge(sync)
}
