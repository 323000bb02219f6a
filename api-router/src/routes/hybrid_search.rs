use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use retrieval_pipeline::{
    graph::DEFAULT_BUDGET, hybrid_search_with_graph, HybridOptions, SearchHit,
};

use crate::{api_state::ApiState, error::ApiError};

use super::{event_dto, truncate_query, validate_limit, EventDto};

#[derive(Debug, Deserialize)]
pub struct HybridSearchParams {
    pub query: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub expand_neighbors: bool,
    #[serde(default)]
    pub include_graph: bool,
    pub graph_budget: Option<usize>,
    pub graph_seed_limit: Option<usize>,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RelatedEventDto {
    pub event: EventDto,
    pub reason: retrieval_pipeline::graph::ExpansionReason,
}

#[derive(Debug, Serialize)]
pub struct HybridSearchResponse {
    pub results: Vec<SearchHit>,
    pub related: Vec<RelatedEventDto>,
    pub total: usize,
}

pub async fn hybrid_search(
    State(state): State<ApiState>,
    Json(params): Json<HybridSearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(truncate_query)
        .ok_or_else(|| ApiError::MissingParameter("query is required".into()))?;

    let limit = validate_limit(params.limit)?;

    let options = HybridOptions {
        limit,
        expand_neighbors: params.expand_neighbors,
        include_graph: params.include_graph,
        // Budget and seed limit are clamped server-side, not rejected.
        graph_budget: params.graph_budget.unwrap_or(DEFAULT_BUDGET),
        graph_seed_limit: params
            .graph_seed_limit
            .unwrap_or(retrieval_pipeline::hybrid::MAX_SEED_LIMIT),
        categories: params.categories,
    };

    let response = hybrid_search_with_graph(&state.engine, &state.db, &query, &options).await?;

    let total = response.results.len();
    Ok(Json(HybridSearchResponse {
        results: response.results,
        related: response
            .related
            .into_iter()
            .map(|related| RelatedEventDto {
                event: event_dto(related.event, None),
                reason: related.reason,
            })
            .collect(),
        total,
    }))
}
