//! Thumbnail workflow handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use thumbsmith_core::models::{GenerationRequest, RunFailure, UploadedArtifact, WorkflowCheckpoint};
use thumbsmith_core::WorkflowError;

use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusResponse {
    pub run_id: Uuid,
    pub record_id: String,
    pub step: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<UploadedArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkflowCheckpoint> for RunStatusResponse {
    fn from(c: WorkflowCheckpoint) -> Self {
        RunStatusResponse {
            run_id: c.run_id,
            record_id: c.request.record_id,
            step: c.step.to_string(),
            status: c.status.to_string(),
            error: c.failure,
            artifact: c.state.artifact,
            cleanup_error: c.state.cleanup_error,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Start a thumbnail generation run for one video. The run proceeds in the background.
#[tracing::instrument(skip_all)]
pub async fn trigger_thumbnail(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<GenerationRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;

    let record_id = request.record_id.clone();
    let run_id = state.runner.submit(request).await?;

    tracing::info!(run_id = %run_id, record_id = %record_id, "Thumbnail generation accepted");

    Ok((StatusCode::ACCEPTED, Json(TriggerResponse { run_id })))
}

#[tracing::instrument(skip(state))]
pub async fn get_thumbnail_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, HttpAppError> {
    let checkpoint = state
        .runner
        .workflow()
        .checkpoint(run_id)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("workflow run {}", run_id)))?;

    Ok(Json(RunStatusResponse::from(checkpoint)))
}
