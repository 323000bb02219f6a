use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use common::storage::types::event_job::{EventJob, JobStatus};

use crate::{api_state::ApiState, error::ApiError};

use super::resolve_revision;

#[derive(Debug, Deserialize)]
pub struct ReextractParams {
    pub artifact_uid: Option<String>,
    pub revision_id: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct ReextractResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

pub async fn event_reextract(
    State(state): State<ApiState>,
    Json(params): Json<ReextractParams>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact_uid = params
        .artifact_uid
        .ok_or_else(|| ApiError::MissingParameter("artifact_uid is required".into()))?;

    let revision =
        resolve_revision(&state.db, &artifact_uid, params.revision_id.as_deref()).await?;

    let (job, message) = EventJob::enqueue_reextract(
        &state.db,
        &artifact_uid,
        &revision.revision_id,
        params.force,
        state.config.max_attempts,
    )
    .await?;

    Ok(Json(ReextractResponse {
        job_id: job.id,
        status: job.status,
        message: message.to_string(),
    }))
}
