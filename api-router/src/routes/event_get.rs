use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;

use common::storage::types::{event_evidence::EventEvidence, semantic_event::SemanticEvent};

use crate::{api_state::ApiState, error::ApiError};

use super::event_dto;

#[derive(Debug, Deserialize)]
pub struct EventGetParams {
    pub event_id: Option<String>,
}

pub async fn event_get(
    State(state): State<ApiState>,
    Json(params): Json<EventGetParams>,
) -> Result<impl IntoResponse, ApiError> {
    let event_id = params
        .event_id
        .ok_or_else(|| ApiError::MissingParameter("event_id is required".into()))?;

    let event = SemanticEvent::get(&state.db, &event_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("event {event_id}")))?;

    let evidence = EventEvidence::for_events(&state.db, &[event.id.clone()]).await?;

    Ok(Json(event_dto(event, Some(evidence))))
}
