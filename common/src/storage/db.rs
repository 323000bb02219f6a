use std::{ops::Deref, sync::Arc};

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use super::types::StoredObject;
use crate::error::AppError;

/// Schema applied on process startup. Statements are idempotent so every
/// server and worker can run them unconditionally.
const MIGRATIONS: &str = r#"
DEFINE TABLE IF NOT EXISTS artifact_revision SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_revision_uid ON artifact_revision FIELDS artifact_uid;
DEFINE INDEX IF NOT EXISTS idx_revision_latest ON artifact_revision FIELDS artifact_uid, is_latest;

DEFINE TABLE IF NOT EXISTS event_job SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_job_unique ON event_job FIELDS artifact_uid, revision_id, job_type UNIQUE;
DEFINE INDEX IF NOT EXISTS idx_job_status_next ON event_job FIELDS status, next_run_at;
DEFINE INDEX IF NOT EXISTS idx_job_created ON event_job FIELDS created_at;

DEFINE TABLE IF NOT EXISTS semantic_event SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_event_revision ON semantic_event FIELDS artifact_uid, revision_id;
DEFINE INDEX IF NOT EXISTS idx_event_category ON semantic_event FIELDS category;
DEFINE ANALYZER IF NOT EXISTS event_fts_analyzer TOKENIZERS class, punct FILTERS lowercase, ascii;
DEFINE INDEX IF NOT EXISTS idx_event_narrative_fts ON semantic_event FIELDS narrative SEARCH ANALYZER event_fts_analyzer BM25;

DEFINE TABLE IF NOT EXISTS event_evidence SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_evidence_event ON event_evidence FIELDS event_id;

DEFINE TABLE IF NOT EXISTS entity SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_entity_normalized ON entity FIELDS normalized_name, entity_type;

DEFINE TABLE IF NOT EXISTS event_actor SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_actor_event ON event_actor FIELDS event_id;
DEFINE INDEX IF NOT EXISTS idx_actor_entity ON event_actor FIELDS entity_id;

DEFINE TABLE IF NOT EXISTS event_subject SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_subject_event ON event_subject FIELDS event_id;
DEFINE INDEX IF NOT EXISTS idx_subject_entity ON event_subject FIELDS entity_id;

DEFINE TABLE IF NOT EXISTS content_vector SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_content_vector_uid ON content_vector FIELDS artifact_uid;

DEFINE TABLE IF NOT EXISTS chunk_vector SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_chunk_vector_uid ON chunk_vector FIELDS artifact_uid;
DEFINE INDEX IF NOT EXISTS idx_chunk_vector_position ON chunk_vector FIELDS artifact_uid, revision_id, chunk_index;
"#;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Run the idempotent schema statements.
    pub async fn apply_migrations(&self) -> Result<(), AppError> {
        self.client
            .query(MIGRATIONS)
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// (Re)define the HNSW indexes for both vector collections.
    ///
    /// The dimension comes from the embedding provider at startup, so this
    /// runs after configuration is resolved rather than inside
    /// `apply_migrations`.
    pub async fn ensure_vector_indexes(&self, dimension: usize) -> Result<(), AppError> {
        for (index, table) in [
            ("idx_embedding_content_vector", "content_vector"),
            ("idx_embedding_chunk_vector", "chunk_vector"),
        ] {
            self.client
                .query(format!(
                    "DEFINE INDEX OVERWRITE {index} ON {table} FIELDS embedding \
                     HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8"
                ))
                .await
                .map_err(AppError::Database)?
                .check()
                .map_err(AppError::Database)?;
        }
        Ok(())
    }

    /// Rebuild the BM25 search index. Tests call this after bulk writes;
    /// production writes maintain the index incrementally.
    pub async fn rebuild_search_indexes(&self) -> Result<(), AppError> {
        self.client
            .query("REBUILD INDEX IF EXISTS idx_event_narrative_fts ON semantic_event")
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Idempotent write keyed by the item's id; repeating it with the same
    /// content is a no-op, which is what makes vector writes retry-safe.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .upsert((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// A SurrealDB commit can fail when two transactions touched the same rows;
/// the loser is safe to retry or to treat as "somebody else got there first".
pub fn is_commit_conflict(error: &Error) -> bool {
    error
        .to_string()
        .contains("Failed to commit transaction due to a read or write conflict")
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
