use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: 200 once the database answers, 503 otherwise. The
/// database is the only hard dependency; the embedding provider and object
/// store are exercised lazily by the pipeline.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    if let Err(e) = state.db.client.query("RETURN 1").await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": e.to_string() })),
        );
    }

    (StatusCode::OK, Json(json!({ "ready": true })))
}
