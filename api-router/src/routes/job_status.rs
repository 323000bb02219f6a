use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;

use common::storage::types::event_job::EventJob;

use crate::{api_state::ApiState, error::ApiError};

use super::{resolve_revision, JobDto};

#[derive(Debug, Deserialize)]
pub struct JobStatusParams {
    pub artifact_uid: Option<String>,
    pub revision_id: Option<String>,
}

pub async fn job_status(
    State(state): State<ApiState>,
    Json(params): Json<JobStatusParams>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact_uid = params
        .artifact_uid
        .ok_or_else(|| ApiError::MissingParameter("artifact_uid is required".into()))?;

    let revision =
        resolve_revision(&state.db, &artifact_uid, params.revision_id.as_deref()).await?;

    let job = EventJob::find_for_revision(&state.db, &artifact_uid, &revision.revision_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "job for revision {artifact_uid}/{}",
                revision.revision_id
            ))
        })?;

    Ok(Json(JobDto::from(job)))
}
