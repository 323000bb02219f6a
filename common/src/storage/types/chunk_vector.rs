use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::artifact_revision::PrivacyMetadata;

/// One row per chunk in the `chunks` collection. Keyed by the chunk id,
/// which embeds the content hash, so identical content upserts in place.
stored_object!(ChunkVectorRecord, "chunk_vector", {
    artifact_uid: String,
    revision_id: String,
    artifact_id: String,
    chunk_index: usize,
    document: String,
    embedding: Vec<f32>,
    start_char: usize,
    end_char: usize,
    token_count: usize,
    content_hash: String,
    sensitivity: String,
    visibility_scope: String
});

/// A `chunks` collection nearest-neighbor hit.
#[derive(Debug, Clone, serde::Deserialize, PartialEq)]
pub struct ChunkHit {
    pub id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub artifact_id: String,
    pub chunk_index: usize,
    pub document: String,
    pub start_char: usize,
    pub end_char: usize,
    pub sensitivity: String,
    pub visibility_scope: String,
    pub score: f32,
}

impl ChunkVectorRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chunk_id: String,
        artifact_uid: String,
        revision_id: String,
        artifact_id: String,
        chunk_index: usize,
        document: String,
        embedding: Vec<f32>,
        start_char: usize,
        end_char: usize,
        token_count: usize,
        content_hash: String,
        privacy: &PrivacyMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: chunk_id,
            created_at: now,
            updated_at: now,
            artifact_uid,
            revision_id,
            artifact_id,
            chunk_index,
            document,
            embedding,
            start_char,
            end_char,
            token_count,
            content_hash,
            sensitivity: privacy.sensitivity.clone(),
            visibility_scope: privacy.visibility_scope.clone(),
        }
    }

    pub async fn upsert_many(db: &SurrealDbClient, records: Vec<Self>) -> Result<(), AppError> {
        for record in records {
            db.upsert_item(record).await?;
        }
        Ok(())
    }

    /// All chunks of a revision, in document order. The worker reassembles
    /// revision text from these when the content record is missing.
    pub async fn list_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM chunk_vector
                 WHERE artifact_uid = $uid AND revision_id = $rev
                 ORDER BY chunk_index ASC",
            )
            .bind(("uid", artifact_uid.to_owned()))
            .bind(("rev", revision_id.to_owned()))
            .await?;

        Ok(response.take(0)?)
    }

    /// The chunks at `index - 1` and `index + 1`, when they exist.
    pub async fn neighbors(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
        chunk_index: usize,
    ) -> Result<Vec<Self>, AppError> {
        let mut wanted = vec![chunk_index + 1];
        if let Some(prev) = chunk_index.checked_sub(1) {
            wanted.push(prev);
        }

        let mut response = db
            .query(
                "SELECT * FROM chunk_vector
                 WHERE artifact_uid = $uid AND revision_id = $rev AND chunk_index IN $indexes
                 ORDER BY chunk_index ASC",
            )
            .bind(("uid", artifact_uid.to_owned()))
            .bind(("rev", revision_id.to_owned()))
            .bind(("indexes", wanted))
            .await?;

        Ok(response.take(0)?)
    }

    /// K-nearest-neighbor search over the chunk collection.
    pub async fn knn(
        db: &SurrealDbClient,
        query_embedding: Vec<f32>,
        take: usize,
    ) -> Result<Vec<ChunkHit>, AppError> {
        let sql = format!(
            r#"
            SELECT
                record::id(id) AS id,
                artifact_uid,
                revision_id,
                artifact_id,
                chunk_index,
                document,
                start_char,
                end_char,
                sensitivity,
                visibility_scope,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM chunk_vector
            WHERE embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take};
            "#
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .await
            .map_err(AppError::Database)?;

        let rows: Vec<ChunkHit> = response.take::<Vec<ChunkHit>>(0).unwrap_or_default();
        Ok(rows)
    }
}
