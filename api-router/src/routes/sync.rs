use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::storage::types::sync_run::SyncType;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub source_id: String,
    pub sync_type: SyncType,
}

/// Kick off a sync for a source. 409 when one is already running.
pub async fn start_sync(
    State(state): State<ApiState>,
    Json(request): Json<SyncRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(source_id = %request.source_id, sync_type = ?request.sync_type, "sync requested");

    let sync_run_id = state
        .coordinator
        .start_sync(&request.source_id, request.sync_type)
        .await?;

    Ok((StatusCode::OK, Json(json!({ "sync_run_id": sync_run_id }))))
}

/// Live progress and outcome of one sync run.
pub async fn sync_status(
    State(state): State<ApiState>,
    Path(sync_run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.coordinator.status(&sync_run_id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": run.status,
            "documents_scanned": run.documents_scanned,
            "documents_emitted": run.documents_emitted,
            "error_message": run.error_message,
        })),
    ))
}

/// Request cooperative cancellation of a running sync.
pub async fn cancel_sync(
    State(state): State<ApiState>,
    Path(sync_run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.coordinator.cancel(&sync_run_id).await {
        Ok((StatusCode::ACCEPTED, Json(json!({ "status": "cancelling" }))))
    } else {
        Err(ApiError::NotFound(format!(
            "no running sync for run {sync_run_id}"
        )))
    }
}
