use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use common::{
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use extraction_pipeline::{
    entity_resolver::EntityResolver, extractor::LlmExtractionService, run_worker_loop,
};
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Grace period for the in-flight job after a shutdown signal; past it the
/// job is abandoned to stale-lock recovery.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

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

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    // The worker reads vectors but never writes them; index dimensions are
    // still ensured so a fresh database works from either process.
    let embeddings = Arc::new(EmbeddingProvider::from_config(
        &config,
        Some(Arc::clone(&openai_client)),
    )?);
    db.ensure_vector_indexes(embeddings.dimension()).await?;

    let extractor = Arc::new(LlmExtractionService::new(
        Arc::clone(&openai_client),
        config.chat_model.clone(),
    ));
    let resolver = Arc::new(
        EntityResolver::new(Arc::clone(&db))
            .with_llm(Arc::clone(&openai_client), config.chat_model.clone()),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let loop_shutdown = Arc::clone(&shutdown);
    let loop_config = config.clone();
    let loop_handle = tokio::spawn(async move {
        run_worker_loop(db, extractor, resolver, &loop_config, loop_shutdown).await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received; finishing the in-flight job");
    shutdown.store(true, Ordering::SeqCst);

    match timeout(SHUTDOWN_GRACE, loop_handle).await {
        Ok(Ok(Ok(()))) => info!("worker stopped cleanly"),
        Ok(Ok(Err(err))) => error!(error = %err, "worker loop exited with an error"),
        Ok(Err(err)) => error!(error = %err, "worker task panicked"),
        Err(_) => warn!("worker did not stop within the grace period; abandoning the job to stale recovery"),
    }

    Ok(())
}
