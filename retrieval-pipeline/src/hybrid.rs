use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::semantic_event::SemanticEvent},
};

use crate::{
    engine::{RetrievalEngine, SearchHit, SearchOptions},
    graph::{expand_events, ExpansionRequest, RelatedEvent},
};

pub const MAX_SEED_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub limit: usize,
    pub expand_neighbors: bool,
    pub include_graph: bool,
    /// Clamped to 1..=100.
    pub graph_budget: usize,
    /// Clamped to 1..=20.
    pub graph_seed_limit: usize,
    pub categories: Vec<String>,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            expand_neighbors: false,
            include_graph: false,
            graph_budget: crate::graph::DEFAULT_BUDGET,
            graph_seed_limit: MAX_SEED_LIMIT,
            categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridResponse {
    pub results: Vec<SearchHit>,
    pub related: Vec<RelatedEvent>,
}

/// Vector recall plus bounded graph expansion over the top hits' events.
///
/// Graph failures never fail the search; they log and degrade to
/// primary-only results.
pub async fn hybrid_search_with_graph(
    engine: &RetrievalEngine,
    db: &Arc<SurrealDbClient>,
    query: &str,
    options: &HybridOptions,
) -> Result<HybridResponse, AppError> {
    let results = engine
        .hybrid_search(
            query,
            &SearchOptions {
                limit: options.limit,
                expand_neighbors: options.expand_neighbors,
            },
        )
        .await?;

    if !options.include_graph || results.is_empty() {
        return Ok(HybridResponse {
            results,
            related: Vec::new(),
        });
    }

    let related = match collect_and_expand(db, &results, options).await {
        Ok(related) => related,
        Err(err) => {
            warn!(error = %err, "graph expansion failed; returning primary results only");
            Vec::new()
        }
    };

    Ok(HybridResponse { results, related })
}

/// Seed events come from the top hits that carry event associations.
async fn collect_and_expand(
    db: &Arc<SurrealDbClient>,
    results: &[SearchHit],
    options: &HybridOptions,
) -> Result<Vec<RelatedEvent>, AppError> {
    let seed_limit = options.graph_seed_limit.clamp(1, MAX_SEED_LIMIT);

    let mut seed_event_ids: Vec<String> = Vec::new();
    let mut seeded_hits = 0usize;
    let mut seen_revisions: Vec<(String, String)> = Vec::new();

    for hit in results {
        if seeded_hits == seed_limit {
            break;
        }
        let key = (hit.artifact_uid.clone(), hit.revision_id.clone());
        if seen_revisions.contains(&key) {
            continue;
        }
        seen_revisions.push(key);

        let events = SemanticEvent::list_for_revision(db, &hit.artifact_uid, &hit.revision_id).await?;
        if events.is_empty() {
            continue;
        }
        seeded_hits += 1;
        seed_event_ids.extend(events.into_iter().map(|e| e.id));
    }

    if seed_event_ids.is_empty() {
        return Ok(Vec::new());
    }

    expand_events(
        db,
        &ExpansionRequest {
            seed_event_ids,
            budget: options.graph_budget,
            categories: options.categories.clone(),
        },
    )
    .await
}
