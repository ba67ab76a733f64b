use axum::{response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe: answers as long as the process is up; cheap enough for
/// aggressive polling.
pub async fn live() -> impl IntoResponse {
    Json(json!({ "alive": true }))
}
