use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: verifies the database answers and reports the
/// embedding backend's health alongside.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    if let Err(err) = state.db.query("RETURN 1").await {
        tracing::warn!(error = %err, "readiness probe failed against the database");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable"})),
        );
    }

    let embedding = state.embeddings.health_check().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "embedding": {
                "ok": embedding.ok,
                "latency_ms": embedding.latency_ms,
            }
        })),
    )
}
