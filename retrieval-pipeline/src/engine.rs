use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use serde::Serialize;
use tracing::debug;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{chunk_vector::ChunkVectorRecord, content_vector::ContentVectorRecord},
    },
    utils::embedding::EmbeddingProvider,
};

/// Literal delimiter inlined between a chunk and its expanded neighbors.
pub const CHUNK_BOUNDARY: &str = "\n[CHUNK BOUNDARY]\n";

/// Overfetch factor per source before fusion.
const OVERFETCH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitKind {
    Artifact,
    Chunk,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub kind: HitKind,
    pub artifact_uid: String,
    pub revision_id: String,
    pub chunk_index: Option<usize>,
    pub title: Option<String>,
    pub text: String,
    pub score: f32,
    pub best_rank: usize,
    pub sensitivity: String,
    pub visibility_scope: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub limit: usize,
    pub expand_neighbors: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            expand_neighbors: false,
        }
    }
}

/// Release decision per result. Enforcement is a future concern; the hook
/// is invoked for every candidate today so the call sites already exist.
pub trait PrivacyFilter: Send + Sync {
    fn release(&self, sensitivity: &str, visibility_scope: &str) -> bool;
}

pub struct NoopPrivacyFilter;

impl PrivacyFilter for NoopPrivacyFilter {
    fn release(&self, _sensitivity: &str, _visibility_scope: &str) -> bool {
        true
    }
}

/// Reciprocal-rank contribution of one source ranking.
fn rrf_contribution(k: usize, rank: usize) -> f64 {
    1.0 / (k as f64 + rank as f64)
}

struct Candidate {
    hit: SearchHit,
    rrf: f64,
}

pub struct RetrievalEngine {
    db: Arc<SurrealDbClient>,
    embeddings: Arc<EmbeddingProvider>,
    rrf_k: usize,
    privacy: Arc<dyn PrivacyFilter>,
}

impl RetrievalEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embeddings: Arc<EmbeddingProvider>,
        rrf_k: usize,
    ) -> Self {
        Self {
            db,
            embeddings,
            rrf_k,
            privacy: Arc::new(NoopPrivacyFilter),
        }
    }

    pub fn with_privacy_filter(mut self, privacy: Arc<dyn PrivacyFilter>) -> Self {
        self.privacy = privacy;
        self
    }

    /// Vector recall across both collections, fused with reciprocal-rank
    /// fusion and deduplicated so a chunk always beats its whole-artifact
    /// sibling.
    #[tracing::instrument(skip_all, fields(limit = options.limit))]
    pub async fn hybrid_search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, AppError> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embeddings.embed_one(query).await?;
        let top_k = options.limit * OVERFETCH;

        let (content_hits, chunk_hits) = tokio::join!(
            ContentVectorRecord::knn(&self.db, embedding.clone(), top_k),
            ChunkVectorRecord::knn(&self.db, embedding, top_k),
        );
        let content_hits = content_hits?;
        let chunk_hits = chunk_hits?;

        debug!(
            content_hits = content_hits.len(),
            chunk_hits = chunk_hits.len(),
            "vector fan-out returned"
        );

        // Fuse. Each source is already ordered by similarity, so the rank
        // is the position within the source.
        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        for (position, hit) in content_hits.into_iter().enumerate() {
            let rank = position + 1;
            merge_candidate(
                &mut candidates,
                self.rrf_k,
                rank,
                SearchHit {
                    id: hit.id,
                    kind: HitKind::Artifact,
                    artifact_uid: hit.artifact_uid,
                    revision_id: hit.revision_id,
                    chunk_index: None,
                    title: hit.title,
                    text: hit.document,
                    score: 0.0,
                    best_rank: rank,
                    sensitivity: hit.sensitivity,
                    visibility_scope: hit.visibility_scope,
                },
            );
        }

        for (position, hit) in chunk_hits.into_iter().enumerate() {
            let rank = position + 1;
            merge_candidate(
                &mut candidates,
                self.rrf_k,
                rank,
                SearchHit {
                    id: hit.id,
                    kind: HitKind::Chunk,
                    artifact_uid: hit.artifact_uid,
                    revision_id: hit.revision_id,
                    chunk_index: Some(hit.chunk_index),
                    title: None,
                    text: hit.document,
                    score: 0.0,
                    best_rank: rank,
                    sensitivity: hit.sensitivity,
                    visibility_scope: hit.visibility_scope,
                },
            );
        }

        // A chunk is more specific than its whole artifact: when both
        // surfaced, drop the artifact entry.
        let uids_with_chunks: Vec<String> = candidates
            .values()
            .filter(|c| c.hit.kind == HitKind::Chunk)
            .map(|c| c.hit.artifact_uid.clone())
            .collect();
        candidates.retain(|_, candidate| {
            candidate.hit.kind == HitKind::Chunk
                || !uids_with_chunks.contains(&candidate.hit.artifact_uid)
        });

        let mut fused: Vec<SearchHit> = candidates
            .into_values()
            .map(|candidate| {
                let mut hit = candidate.hit;
                hit.score = candidate.rrf as f32;
                hit
            })
            .collect();

        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.best_rank.cmp(&b.best_rank))
                .then_with(|| a.id.cmp(&b.id))
        });

        // The hook must run for every candidate even while it releases
        // everything.
        fused.retain(|hit| self.privacy.release(&hit.sensitivity, &hit.visibility_scope));

        fused.truncate(options.limit);

        if options.expand_neighbors {
            for hit in &mut fused {
                if let Some(index) = hit.chunk_index {
                    self.expand_neighbors(hit, index).await?;
                }
            }
        }

        Ok(fused)
    }

    /// Inline the chunks at `index ± 1` around the hit text.
    async fn expand_neighbors(&self, hit: &mut SearchHit, index: usize) -> Result<(), AppError> {
        let neighbors =
            ChunkVectorRecord::neighbors(&self.db, &hit.artifact_uid, &hit.revision_id, index)
                .await?;
        if neighbors.is_empty() {
            return Ok(());
        }

        let mut pieces: Vec<String> = Vec::with_capacity(3);
        for neighbor in &neighbors {
            if neighbor.chunk_index < index {
                pieces.push(neighbor.document.clone());
            }
        }
        pieces.push(hit.text.clone());
        for neighbor in &neighbors {
            if neighbor.chunk_index > index {
                pieces.push(neighbor.document.clone());
            }
        }

        hit.text = pieces.join(CHUNK_BOUNDARY);
        Ok(())
    }
}

fn merge_candidate(
    candidates: &mut HashMap<String, Candidate>,
    rrf_k: usize,
    rank: usize,
    hit: SearchHit,
) {
    let contribution = rrf_contribution(rrf_k, rank);
    candidates
        .entry(hit.id.clone())
        .and_modify(|existing| {
            existing.rrf += contribution;
            existing.hit.best_rank = existing.hit.best_rank.min(rank);
        })
        .or_insert(Candidate { hit, rrf: contribution });
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::artifact_revision::PrivacyMetadata;
    use common::storage::types::artifact_revision::ArtifactKind;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use uuid::Uuid;

    const DIM: usize = 16;

    async fn engine() -> RetrievalEngine {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.apply_migrations().await.expect("migrations");
        db.ensure_vector_indexes(DIM).await.expect("vector indexes");

        let embeddings = Arc::new(EmbeddingProvider::new_hashed(DIM));
        RetrievalEngine::new(db, embeddings, 60)
    }

    async fn seed_content(engine: &RetrievalEngine, artifact_id: &str, uid: &str, text: &str) {
        let embedding = engine.embeddings.embed_one(text).await.expect("embed");
        ContentVectorRecord::upsert(
            &engine.db,
            ContentVectorRecord::new(
                artifact_id.to_string(),
                uid.to_string(),
                "rev_1".to_string(),
                ArtifactKind::Note,
                "manual".to_string(),
                None,
                text.to_string(),
                embedding,
                &PrivacyMetadata::default(),
                "hash".to_string(),
                10,
            ),
        )
        .await
        .expect("seed content");
    }

    async fn seed_chunk(
        engine: &RetrievalEngine,
        artifact_id: &str,
        uid: &str,
        index: usize,
        text: &str,
    ) {
        let embedding = engine.embeddings.embed_one(text).await.expect("embed");
        engine
            .db
            .upsert_item(ChunkVectorRecord::new(
                format!("{artifact_id}::chunk::{index:03}::aabbccdd"),
                uid.to_string(),
                "rev_1".to_string(),
                artifact_id.to_string(),
                index,
                text.to_string(),
                embedding,
                index * 100,
                index * 100 + text.len(),
                10,
                "hash".to_string(),
                &PrivacyMetadata::default(),
            ))
            .await
            .expect("seed chunk");
    }

    #[test]
    fn rrf_contribution_matches_the_formula() {
        assert!((rrf_contribution(60, 1) - 1.0 / 61.0).abs() < 1e-12);
        assert!((rrf_contribution(60, 10) - 1.0 / 70.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn chunk_hits_suppress_their_artifact_entry() {
        let engine = engine().await;

        // Artifact A: unchunked. Artifact B: content entry plus chunks that
        // match the same vocabulary.
        seed_content(&engine, "art_a", "uid_a", "planning the quarterly roadmap").await;
        seed_content(&engine, "art_b", "uid_b", "roadmap review meeting notes").await;
        for i in 0..5 {
            seed_chunk(
                &engine,
                "art_b",
                "uid_b",
                i,
                &format!("roadmap review segment {i}"),
            )
            .await;
        }

        let hits = engine
            .hybrid_search("roadmap review", &SearchOptions::default())
            .await
            .expect("search");

        assert!(!hits.is_empty());
        let a_entries: Vec<_> = hits.iter().filter(|h| h.artifact_uid == "uid_a").collect();
        assert_eq!(a_entries.len(), 1, "artifact A appears exactly once");
        assert_eq!(a_entries[0].kind, HitKind::Artifact);

        assert!(
            hits.iter()
                .filter(|h| h.artifact_uid == "uid_b")
                .all(|h| h.kind == HitKind::Chunk),
            "artifact B's content entry never appears alongside its chunks"
        );

        // Every id at most once.
        let mut ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), hits.len());
    }

    #[tokio::test]
    async fn results_are_bounded_by_limit() {
        let engine = engine().await;
        for i in 0..10 {
            seed_content(
                &engine,
                &format!("art_{i}"),
                &format!("uid_{i}"),
                &format!("shared vocabulary entry {i}"),
            )
            .await;
        }

        let hits = engine
            .hybrid_search(
                "shared vocabulary",
                &SearchOptions {
                    limit: 4,
                    expand_neighbors: false,
                },
            )
            .await
            .expect("search");
        assert!(hits.len() <= 4);
    }

    #[tokio::test]
    async fn equal_scores_break_ties_deterministically() {
        let engine = engine().await;
        // Identical text means identical embeddings and identical RRF
        // scores; ordering must then fall back to the id.
        seed_content(&engine, "art_x", "uid_x", "identical twin text").await;
        seed_content(&engine, "art_y", "uid_y", "identical twin text").await;

        let first = engine
            .hybrid_search("identical twin text", &SearchOptions::default())
            .await
            .expect("search");
        let second = engine
            .hybrid_search("identical twin text", &SearchOptions::default())
            .await
            .expect("search again");

        let first_ids: Vec<&str> = first.iter().map(|h| h.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(first_ids, second_ids, "ordering is stable across runs");
    }

    #[tokio::test]
    async fn neighbor_expansion_inlines_the_boundary_marker() {
        let engine = engine().await;
        seed_chunk(&engine, "art_b", "uid_b", 0, "first segment about tokio").await;
        seed_chunk(&engine, "art_b", "uid_b", 1, "second segment about tokio").await;
        seed_chunk(&engine, "art_b", "uid_b", 2, "third segment about tokio").await;

        let hits = engine
            .hybrid_search(
                "second segment about tokio",
                &SearchOptions {
                    limit: 1,
                    expand_neighbors: true,
                },
            )
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        let text = &hits[0].text;
        assert_eq!(text.matches(CHUNK_BOUNDARY).count(), 2);
        let pieces: Vec<&str> = text.split(CHUNK_BOUNDARY).collect();
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], "first segment about tokio");
        assert_eq!(pieces[2], "third segment about tokio");
    }

    #[tokio::test]
    async fn privacy_hook_is_invoked_for_every_candidate() {
        struct CountingFilter(AtomicUsize);
        impl PrivacyFilter for CountingFilter {
            fn release(&self, _sensitivity: &str, _visibility_scope: &str) -> bool {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
                true
            }
        }

        let filter = Arc::new(CountingFilter(AtomicUsize::new(0)));
        let engine = engine().await.with_privacy_filter(filter.clone());

        seed_content(&engine, "art_a", "uid_a", "private planning notes").await;
        seed_content(&engine, "art_b", "uid_b", "private planning summary").await;

        let hits = engine
            .hybrid_search("private planning", &SearchOptions::default())
            .await
            .expect("search");

        assert!(!hits.is_empty());
        assert!(
            filter.0.load(AtomicOrdering::SeqCst) >= hits.len(),
            "the hook ran for each surviving candidate"
        );
    }
}
