#![allow(clippy::missing_docs_in_private_items)]

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};

use routes::{
    artifact_forget::artifact_forget, artifact_ingest::artifact_ingest, event_get::event_get,
    event_list_for_revision::event_list_for_revision, event_reextract::event_reextract,
    event_search::event_search, hybrid_search::hybrid_search, job_status::job_status,
    liveness::live, readiness::ready,
};

use api_state::ApiState;

pub mod api_state;
pub mod error;
pub mod routes;

/// Router for the tool RPC surface, version 1.
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let tools = Router::new()
        .route("/tools/artifact_ingest", post(artifact_ingest))
        .route("/tools/artifact_forget", post(artifact_forget))
        .route("/tools/event_search", post(event_search))
        .route("/tools/event_get", post(event_get))
        .route("/tools/event_list_for_revision", post(event_list_for_revision))
        .route("/tools/event_reextract", post(event_reextract))
        .route("/tools/job_status", post(job_status))
        .route("/tools/hybrid_search", post(hybrid_search))
        .layer(DefaultBodyLimit::max(
            app_state.config.max_content_chars.saturating_add(65_536),
        ));

    public.merge(tools)
}
