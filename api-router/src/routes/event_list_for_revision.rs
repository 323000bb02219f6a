use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use common::storage::types::semantic_event::SemanticEvent;

use crate::{api_state::ApiState, error::ApiError};

use super::{attach_evidence, event_dto, resolve_revision, EventDto};

#[derive(Debug, Deserialize)]
pub struct EventListParams {
    pub artifact_uid: Option<String>,
    pub revision_id: Option<String>,
    #[serde(default)]
    pub include_evidence: bool,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub artifact_uid: String,
    pub revision_id: String,
    pub is_latest: bool,
    pub events: Vec<EventDto>,
    pub total: usize,
}

pub async fn event_list_for_revision(
    State(state): State<ApiState>,
    Json(params): Json<EventListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact_uid = params
        .artifact_uid
        .ok_or_else(|| ApiError::MissingParameter("artifact_uid is required".into()))?;

    let revision =
        resolve_revision(&state.db, &artifact_uid, params.revision_id.as_deref()).await?;

    let events =
        SemanticEvent::list_for_revision(&state.db, &artifact_uid, &revision.revision_id).await?;
    let total = events.len();

    let events = if params.include_evidence {
        attach_evidence(&state.db, events).await?
    } else {
        events.into_iter().map(|event| event_dto(event, None)).collect()
    };

    Ok(Json(EventListResponse {
        artifact_uid,
        revision_id: revision.revision_id,
        is_latest: revision.is_latest,
        events,
        total,
    }))
}
