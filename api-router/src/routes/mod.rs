use chrono::{DateTime, Utc};
use serde::Serialize;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_revision::ArtifactRevision,
            event_evidence::EventEvidence,
            event_job::{EventJob, JobStatus},
            semantic_event::{EventActor, EventSubject, SemanticEvent},
        },
    },
};

use crate::error::ApiError;

pub mod artifact_forget;
pub mod artifact_ingest;
pub mod event_get;
pub mod event_list_for_revision;
pub mod event_reextract;
pub mod event_search;
pub mod hybrid_search;
pub mod job_status;
pub mod liveness;
pub mod readiness;

/// Hard cap on `limit` parameters; larger values are rejected, not clamped.
pub const LIMIT_CAP: usize = 100;
pub const LIMIT_DEFAULT: usize = 20;
/// Queries longer than this are truncated, not rejected.
pub const QUERY_MAX_CHARS: usize = 1000;

/// Wire shape for events; timestamps render as RFC 3339 strings instead of
/// the storage engine's datetime encoding.
#[derive(Debug, Clone, Serialize)]
pub struct EventDto {
    pub event_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub category: String,
    pub event_time: Option<DateTime<Utc>>,
    pub narrative: String,
    pub subject: EventSubject,
    pub actors: Vec<EventActor>,
    pub confidence: f32,
    pub extraction_run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<EvidenceDto>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceDto {
    pub evidence_id: String,
    pub quote: String,
    pub start_char: usize,
    pub end_char: usize,
    pub chunk_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDto {
    pub job_id: String,
    pub job_type: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EventJob> for JobDto {
    fn from(job: EventJob) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            artifact_uid: job.artifact_uid,
            revision_id: job.revision_id,
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            next_run_at: job.next_run_at,
            locked_at: job.locked_at,
            locked_by: job.locked_by,
            last_error_code: job.last_error_code,
            last_error_message: job.last_error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

pub fn event_dto(event: SemanticEvent, evidence: Option<Vec<EventEvidence>>) -> EventDto {
    EventDto {
        event_id: event.id,
        artifact_uid: event.artifact_uid,
        revision_id: event.revision_id,
        category: event.category.as_str().to_string(),
        event_time: event.event_time,
        narrative: event.narrative,
        subject: event.subject,
        actors: event.actors,
        confidence: event.confidence,
        extraction_run_id: event.extraction_run_id,
        evidence: evidence.map(|rows| rows.into_iter().map(evidence_dto).collect()),
    }
}

pub fn evidence_dto(row: EventEvidence) -> EvidenceDto {
    EvidenceDto {
        evidence_id: row.id,
        quote: row.quote,
        start_char: row.start_char,
        end_char: row.end_char,
        chunk_id: row.chunk_id,
    }
}

/// Validate a caller-supplied limit against the hard cap.
pub fn validate_limit(limit: Option<usize>) -> Result<usize, ApiError> {
    let limit = limit.unwrap_or(LIMIT_DEFAULT);
    if limit == 0 || limit > LIMIT_CAP {
        return Err(ApiError::InvalidParameter(format!(
            "limit must be between 1 and {LIMIT_CAP}"
        )));
    }
    Ok(limit)
}

pub fn truncate_query(query: &str) -> String {
    query.chars().take(QUERY_MAX_CHARS).collect()
}

/// Resolve an explicit revision or fall back to the artifact's latest.
pub async fn resolve_revision(
    db: &SurrealDbClient,
    artifact_uid: &str,
    revision_id: Option<&str>,
) -> Result<ArtifactRevision, ApiError> {
    let found = match revision_id {
        Some(revision_id) => ArtifactRevision::find(db, artifact_uid, revision_id)
            .await
            .map_err(ApiError::from)?,
        None => ArtifactRevision::latest_for_uid(db, artifact_uid)
            .await
            .map_err(ApiError::from)?,
    };

    found.ok_or_else(|| {
        ApiError::NotFound(match revision_id {
            Some(revision_id) => format!("revision {artifact_uid}/{revision_id}"),
            None => format!("artifact {artifact_uid}"),
        })
    })
}

/// Attach evidence rows to their events in one round trip.
pub async fn attach_evidence(
    db: &SurrealDbClient,
    events: Vec<SemanticEvent>,
) -> Result<Vec<EventDto>, AppError> {
    let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
    let mut by_event: std::collections::HashMap<String, Vec<EventEvidence>> =
        std::collections::HashMap::new();
    for row in EventEvidence::for_events(db, &ids).await? {
        by_event.entry(row.event_id.clone()).or_default().push(row);
    }

    Ok(events
        .into_iter()
        .map(|event| {
            let rows = by_event.remove(&event.id).unwrap_or_default();
            event_dto(event, Some(rows))
        })
        .collect())
}
