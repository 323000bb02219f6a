use std::{
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_revision::{ArtifactKind, ArtifactRevision, PrivacyMetadata},
            chunk_vector::ChunkVectorRecord,
            content_vector::ContentVectorRecord,
            event_job::{EventJob, JobStatus},
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider, ids},
};

use crate::chunker::Chunker;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub kind: String,
    pub source_system: String,
    pub content: String,
    #[serde(default)]
    pub metadata: IngestMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestMetadata {
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    /// RFC 3339; rejected with a validation error when malformed.
    pub occurred_at: Option<String>,
    pub sensitivity: Option<String>,
    pub visibility_scope: Option<String>,
    pub retention_policy: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IngestOutcome {
    Created,
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub artifact_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub chunked: bool,
    pub num_chunks: usize,
    pub job_id: Option<String>,
    pub job_status: Option<JobStatus>,
    pub status: IngestOutcome,
}

/// Synchronous ingest path: hash, chunk, embed, write both stores, enqueue
/// extraction. Embedding completes in full before any write starts, so a
/// failed phase 1 leaves no trace in either store.
pub struct IngestCoordinator {
    db: Arc<SurrealDbClient>,
    embeddings: Arc<EmbeddingProvider>,
    chunker: Chunker,
    config: AppConfig,
}

impl IngestCoordinator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embeddings: Arc<EmbeddingProvider>,
        config: AppConfig,
    ) -> Result<Self, AppError> {
        let chunker = Chunker::from_config(&config)?;
        Ok(Self {
            db,
            embeddings,
            chunker,
            config,
        })
    }

    #[tracing::instrument(skip_all, fields(kind = %request.kind, source_system = %request.source_system))]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt, AppError> {
        let started = Instant::now();

        let kind: ArtifactKind = request.kind.parse()?;
        let occurred_at = validate_request(&request, self.config.max_content_chars)?;

        let artifact_uid = ids::artifact_uid(
            &request.source_system,
            request.metadata.source_id.as_deref(),
            &request.content,
        );
        let revision_id = ids::revision_id(&request.content);
        let artifact_id = ids::artifact_id(&artifact_uid);

        // Idempotence: a (uid, revision) pair that already exists means the
        // identical content was ingested before; report it without side
        // effects.
        if let Some(existing) =
            ArtifactRevision::find(&self.db, &artifact_uid, &revision_id).await?
        {
            let job = EventJob::find_for_revision(&self.db, &artifact_uid, &revision_id).await?;
            info!(%artifact_uid, %revision_id, "revision already ingested");
            return Ok(IngestReceipt {
                artifact_id,
                artifact_uid,
                revision_id,
                chunked: existing.chunk_count > 0,
                num_chunks: existing.chunk_count,
                job_id: job.as_ref().map(|j| j.id.clone()),
                job_status: job.map(|j| j.status),
                status: IngestOutcome::Unchanged,
            });
        }

        let (chunked, token_count) = self.chunker.should_chunk(&request.content)?;

        // Phase 1: embeddings for everything we are about to write.
        let embed_started = Instant::now();
        let (content_embedding, chunks, chunk_embeddings) = if chunked {
            let chunks = self.chunker.chunk(&request.content, &artifact_id)?;
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embeddings.embed_many(&texts).await?;
            let centroid = centroid(&vectors, self.embeddings.dimension());
            (centroid, chunks, vectors)
        } else {
            let vector = self.embeddings.embed_one(&request.content).await?;
            (vector, Vec::new(), Vec::new())
        };
        let embed_ms = duration_millis(embed_started.elapsed());

        let privacy = PrivacyMetadata {
            sensitivity: request
                .metadata
                .sensitivity
                .clone()
                .unwrap_or_else(|| PrivacyMetadata::default().sensitivity),
            visibility_scope: request
                .metadata
                .visibility_scope
                .clone()
                .unwrap_or_else(|| PrivacyMetadata::default().visibility_scope),
            retention_policy: request
                .metadata
                .retention_policy
                .clone()
                .unwrap_or_else(|| PrivacyMetadata::default().retention_policy),
        };
        let content_hash = ids::content_hash(&request.content);
        let num_chunks = chunks.len();

        // Phase 2a: vector collections. Upserts are idempotent by id, so a
        // retry after a relational failure rewrites the same rows.
        let vector_started = Instant::now();
        ContentVectorRecord::upsert(
            &self.db,
            ContentVectorRecord::new(
                artifact_id.clone(),
                artifact_uid.clone(),
                revision_id.clone(),
                kind,
                request.source_system.clone(),
                request.metadata.title.clone(),
                request.content.clone(),
                content_embedding,
                &privacy,
                content_hash.clone(),
                token_count,
            ),
        )
        .await?;

        if chunked {
            let records = chunks
                .iter()
                .zip(chunk_embeddings)
                .map(|(chunk, embedding)| {
                    ChunkVectorRecord::new(
                        chunk.id.clone(),
                        artifact_uid.clone(),
                        revision_id.clone(),
                        artifact_id.clone(),
                        chunk.index,
                        chunk.content.clone(),
                        embedding,
                        chunk.start_char,
                        chunk.end_char,
                        chunk.token_count,
                        chunk.content_hash.clone(),
                        &privacy,
                    )
                })
                .collect();
            ChunkVectorRecord::upsert_many(&self.db, records).await?;
        }
        let vector_ms = duration_millis(vector_started.elapsed());

        // Phase 2b: one relational transaction makes the revision visible
        // and enqueues extraction.
        let now = Utc::now();
        let revision = ArtifactRevision {
            id: ArtifactRevision::record_key(&artifact_uid, &revision_id),
            created_at: now,
            updated_at: now,
            artifact_uid: artifact_uid.clone(),
            revision_id: revision_id.clone(),
            artifact_id: artifact_id.clone(),
            kind,
            source_system: request.source_system.clone(),
            source_id: request.metadata.source_id.clone(),
            title: request.metadata.title.clone(),
            author: request.metadata.author.clone(),
            participants: request.metadata.participants.clone(),
            occurred_at,
            privacy,
            content_hash,
            token_count,
            chunk_count: num_chunks,
            chunk_target: self.config.chunk_target_tokens,
            chunk_overlap: self.config.chunk_overlap_tokens,
            is_latest: true,
        };
        let job = EventJob::new(
            artifact_uid.clone(),
            revision_id.clone(),
            self.config.max_attempts,
        );
        let job_id = job.id.clone();

        ArtifactRevision::commit_with_job(&self.db, revision, job).await?;

        info!(
            %artifact_uid,
            %revision_id,
            token_count,
            chunked,
            num_chunks,
            embed_ms,
            vector_ms,
            total_ms = duration_millis(started.elapsed()),
            "artifact ingested"
        );

        Ok(IngestReceipt {
            artifact_id,
            artifact_uid,
            revision_id,
            chunked,
            num_chunks,
            job_id: Some(job_id),
            job_status: Some(JobStatus::Pending),
            status: IngestOutcome::Created,
        })
    }
}

fn validate_request(
    request: &IngestRequest,
    max_content_chars: usize,
) -> Result<Option<DateTime<Utc>>, AppError> {
    if request.content.trim().is_empty() {
        return Err(AppError::validation(
            "MISSING_PARAMETER",
            "content must not be empty",
        ));
    }
    if request.content.len() > max_content_chars {
        return Err(AppError::validation(
            "INVALID_PARAMETER",
            format!(
                "content length {} exceeds the maximum of {max_content_chars}",
                request.content.len()
            ),
        ));
    }
    if request.source_system.trim().is_empty() {
        return Err(AppError::validation(
            "MISSING_PARAMETER",
            "source_system must not be empty",
        ));
    }

    match &request.metadata.occurred_at {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                AppError::validation("INVALID_PARAMETER", format!("malformed timestamp: {e}"))
            }),
    }
}

/// Mean of the chunk vectors; stands in for a whole-document embedding the
/// upstream cannot produce past its token ceiling.
fn centroid(vectors: &[Vec<f32>], dimension: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; dimension];
    if vectors.is_empty() {
        return out;
    }

    for vector in vectors {
        for (slot, value) in out.iter_mut().zip(vector) {
            *slot += value;
        }
    }
    let n = vectors.len() as f32;
    for slot in &mut out {
        *slot /= n;
    }
    out
}

fn duration_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
