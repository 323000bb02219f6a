use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;

use ingestion_pipeline::{IngestMetadata, IngestRequest};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct IngestParams {
    pub kind: Option<String>,
    pub source_system: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: IngestMetadata,
}

pub async fn artifact_ingest(
    State(state): State<ApiState>,
    Json(params): Json<IngestParams>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = params
        .kind
        .ok_or_else(|| ApiError::MissingParameter("kind is required".into()))?;
    let source_system = params
        .source_system
        .ok_or_else(|| ApiError::MissingParameter("source_system is required".into()))?;
    let content = params
        .content
        .ok_or_else(|| ApiError::MissingParameter("content is required".into()))?;

    let receipt = state
        .coordinator
        .ingest(IngestRequest {
            kind,
            source_system,
            content,
            metadata: params.metadata,
        })
        .await?;

    Ok(Json(receipt))
}
