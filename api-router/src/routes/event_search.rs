use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use common::storage::types::semantic_event::{EventCategory, EventSearchFilters, SemanticEvent};

use crate::{api_state::ApiState, error::ApiError};

use super::{attach_evidence, event_dto, truncate_query, validate_limit, EventDto};

#[derive(Debug, Deserialize)]
pub struct EventSearchParams {
    pub query: Option<String>,
    pub category: Option<String>,
    pub time_from: Option<String>,
    pub time_to: Option<String>,
    pub artifact_uid: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_evidence: bool,
}

#[derive(Debug, Serialize)]
pub struct EventSearchResponse {
    pub events: Vec<EventDto>,
    pub total: usize,
    pub filters_applied: serde_json::Value,
}

pub async fn event_search(
    State(state): State<ApiState>,
    Json(params): Json<EventSearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = validate_limit(params.limit)?;

    let category = params
        .category
        .as_deref()
        .map(str::parse::<EventCategory>)
        .transpose()
        .map_err(|_| {
            ApiError::InvalidCategory(format!(
                "category must be one of: {}",
                EventCategory::ALL.map(|c| c.as_str()).join(", ")
            ))
        })?;

    let time_from = parse_time(params.time_from.as_deref(), "time_from")?;
    let time_to = parse_time(params.time_to.as_deref(), "time_to")?;
    let query = params.query.as_deref().map(truncate_query);

    let filters = EventSearchFilters {
        query: query.clone(),
        category,
        time_from,
        time_to,
        artifact_uid: params.artifact_uid.clone(),
        limit,
    };

    let (events, total) = SemanticEvent::search(&state.db, &filters).await?;

    let events = if params.include_evidence {
        attach_evidence(&state.db, events).await?
    } else {
        events.into_iter().map(|event| event_dto(event, None)).collect()
    };

    let filters_applied = json!({
        "query": query,
        "category": category.map(|c| c.as_str()),
        "time_from": time_from,
        "time_to": time_to,
        "artifact_uid": params.artifact_uid,
        "limit": limit,
    });

    Ok(Json(EventSearchResponse {
        events,
        total,
        filters_applied,
    }))
}

fn parse_time(raw: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ApiError::InvalidParameter(format!("{field} is not RFC 3339: {e}")))
    })
    .transpose()
}
