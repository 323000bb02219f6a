use std::sync::Arc;

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use ingestion_pipeline::IngestCoordinator;
use retrieval_pipeline::RetrievalEngine;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub embeddings: Arc<EmbeddingProvider>,
    pub coordinator: Arc<IngestCoordinator>,
    pub engine: Arc<RetrievalEngine>,
}

impl ApiState {
    pub async fn new(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        db.apply_migrations().await?;

        let embeddings = Arc::new(EmbeddingProvider::from_config(config, None)?);
        db.ensure_vector_indexes(embeddings.dimension()).await?;

        Ok(Self::with_resources(db, config.clone(), embeddings)?)
    }

    /// Assemble the state from already-initialized resources. Tests use
    /// this with an in-memory database and the hashed embedding backend.
    pub fn with_resources(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        embeddings: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let coordinator = Arc::new(IngestCoordinator::new(
            Arc::clone(&db),
            Arc::clone(&embeddings),
            config.clone(),
        )?);
        let engine = Arc::new(RetrievalEngine::new(
            Arc::clone(&db),
            Arc::clone(&embeddings),
            config.rrf_k,
        ));

        Ok(Self {
            db,
            config,
            embeddings,
            coordinator,
            engine,
        })
    }
}
