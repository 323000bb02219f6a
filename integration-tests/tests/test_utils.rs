use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::artifact_revision::ArtifactRevision},
    storage::types::semantic_event::{EventActor, EventCategory, EventSubject},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use extraction_pipeline::{
    entity_resolver::EntityResolver,
    extractor::{CanonicalEvent, CanonicalEvidence, EventExtractor, ExtractionChunk},
};
use ingestion_pipeline::IngestCoordinator;

pub const TEST_DIM: usize = 16;

/// Small chunk windows so chunked-path scenarios stay cheap.
pub fn test_config() -> AppConfig {
    AppConfig {
        embedding_dim: TEST_DIM,
        single_piece_max_tokens: 10,
        chunk_target_tokens: 8,
        chunk_overlap_tokens: 2,
        ..AppConfig::default()
    }
}

pub async fn test_db() -> Arc<SurrealDbClient> {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb"),
    );
    db.apply_migrations().await.expect("migrations");
    db.ensure_vector_indexes(TEST_DIM).await.expect("vector indexes");
    db
}

pub fn test_provider() -> Arc<EmbeddingProvider> {
    Arc::new(EmbeddingProvider::new_hashed(TEST_DIM))
}

pub fn test_coordinator(db: &Arc<SurrealDbClient>) -> IngestCoordinator {
    IngestCoordinator::new(Arc::clone(db), test_provider(), test_config())
        .expect("coordinator")
}

pub fn test_resolver(db: &Arc<SurrealDbClient>) -> EntityResolver {
    EntityResolver::new(Arc::clone(db))
}

/// Deterministic extractor: finds one Decision event quoting a fixed
/// phrase when it appears in the revision text.
pub struct QuoteExtractor {
    pub phrase: &'static str,
    pub actor: &'static str,
}

#[async_trait]
impl EventExtractor for QuoteExtractor {
    async fn extract(
        &self,
        _revision: &ArtifactRevision,
        _content_len: usize,
        chunks: &[ExtractionChunk],
    ) -> Result<Vec<CanonicalEvent>, AppError> {
        let mut events = Vec::new();
        for chunk in chunks {
            if let Some(offset) = chunk.content.find(self.phrase) {
                let start = chunk.start_char + offset;
                events.push(CanonicalEvent {
                    category: EventCategory::Decision,
                    event_time: None,
                    narrative: format!("Decision recorded: {}", self.phrase),
                    subject: EventSubject {
                        subject_type: "project".to_string(),
                        subject_ref: "release".to_string(),
                    },
                    actors: vec![EventActor {
                        ref_name: self.actor.to_string(),
                        role: "decision_maker".to_string(),
                    }],
                    confidence: 0.95,
                    evidence: vec![CanonicalEvidence {
                        quote: self.phrase.to_string(),
                        start_char: start,
                        end_char: start + self.phrase.len(),
                        chunk_id: chunk.chunk_id.clone(),
                    }],
                });
            }
        }
        Ok(events)
    }
}

/// Extractor that fails a configured number of times before succeeding,
/// driving the queue's transient retry path.
pub struct FlakyExtractor {
    pub failures_remaining: std::sync::atomic::AtomicUsize,
    pub inner: QuoteExtractor,
}

#[async_trait]
impl EventExtractor for FlakyExtractor {
    async fn extract(
        &self,
        revision: &ArtifactRevision,
        content_len: usize,
        chunks: &[ExtractionChunk],
    ) -> Result<Vec<CanonicalEvent>, AppError> {
        use std::sync::atomic::Ordering;
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::transient("TIMEOUT", "simulated upstream timeout"));
        }
        self.inner.extract(revision, content_len, chunks).await
    }
}
