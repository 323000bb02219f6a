use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::artifact_revision::{ArtifactKind, PrivacyMetadata};

/// One row per artifact in the `content` collection: the full document (or
/// its representative text), its embedding, and the metadata the retrieval
/// layer filters on. Keyed by `artifact_id`, so re-ingest upserts in place.
stored_object!(ContentVectorRecord, "content_vector", {
    artifact_uid: String,
    revision_id: String,
    kind: ArtifactKind,
    source_system: String,
    title: Option<String>,
    document: String,
    embedding: Vec<f32>,
    sensitivity: String,
    visibility_scope: String,
    content_hash: String,
    token_count: usize
});

/// A `content` collection nearest-neighbor hit.
#[derive(Debug, Clone, serde::Deserialize, PartialEq)]
pub struct ContentHit {
    pub id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    pub title: Option<String>,
    pub document: String,
    pub sensitivity: String,
    pub visibility_scope: String,
    pub score: f32,
}

impl ContentVectorRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        artifact_id: String,
        artifact_uid: String,
        revision_id: String,
        kind: ArtifactKind,
        source_system: String,
        title: Option<String>,
        document: String,
        embedding: Vec<f32>,
        privacy: &PrivacyMetadata,
        content_hash: String,
        token_count: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: artifact_id,
            created_at: now,
            updated_at: now,
            artifact_uid,
            revision_id,
            kind,
            source_system,
            title,
            document,
            embedding,
            sensitivity: privacy.sensitivity.clone(),
            visibility_scope: privacy.visibility_scope.clone(),
            content_hash,
            token_count,
        }
    }

    pub async fn upsert(db: &SurrealDbClient, record: Self) -> Result<(), AppError> {
        db.upsert_item(record).await?;
        Ok(())
    }

    pub async fn get(db: &SurrealDbClient, artifact_id: &str) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(artifact_id).await?)
    }

    pub async fn get_by_uid(
        db: &SurrealDbClient,
        artifact_uid: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM content_vector WHERE artifact_uid = $uid LIMIT 1")
            .bind(("uid", artifact_uid.to_owned()))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// K-nearest-neighbor search over the whole-artifact collection.
    pub async fn knn(
        db: &SurrealDbClient,
        query_embedding: Vec<f32>,
        take: usize,
    ) -> Result<Vec<ContentHit>, AppError> {
        let sql = format!(
            r#"
            SELECT
                record::id(id) AS id,
                artifact_uid,
                revision_id,
                title,
                document,
                sensitivity,
                visibility_scope,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM content_vector
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

        let rows: Vec<ContentHit> = response.take::<Vec<ContentHit>>(0).unwrap_or_default();
        Ok(rows)
    }
}
