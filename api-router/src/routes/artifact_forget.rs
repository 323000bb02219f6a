use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use common::storage::types::artifact_revision::ArtifactRevision;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ForgetParams {
    pub artifact_uid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ForgetResponse {
    pub artifact_uid: String,
    pub revisions_removed: usize,
    pub events_removed: usize,
    pub chunks_removed: usize,
}

/// Remove an artifact entirely: revisions, events, evidence, entity joins,
/// jobs, and vector records.
pub async fn artifact_forget(
    State(state): State<ApiState>,
    Json(params): Json<ForgetParams>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact_uid = params
        .artifact_uid
        .ok_or_else(|| ApiError::MissingParameter("artifact_uid is required".into()))?;

    let report = ArtifactRevision::forget_artifact(&state.db, &artifact_uid).await?;
    if report.revisions == 0 {
        return Err(ApiError::NotFound(format!("artifact {artifact_uid}")));
    }

    Ok(Json(ForgetResponse {
        artifact_uid,
        revisions_removed: report.revisions,
        events_removed: report.events,
        chunks_removed: report.chunks,
    }))
}
