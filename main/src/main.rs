use std::sync::{atomic::AtomicBool, Arc};

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::utils::config::get_config;
use extraction_pipeline::{
    entity_resolver::EntityResolver, extractor::LlmExtractionService, run_worker_loop,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Development entry point: the server and one worker in a single
/// process. Production deployments run the `server` and `worker` binaries
/// separately.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let api_state = ApiState::new(&config).await?;
    info!(
        embedding_backend = api_state.embeddings.backend_label(),
        embedding_dimension = api_state.embeddings.dimension(),
        "embedding provider initialized"
    );

    // In-process worker sharing the server's connection.
    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let extractor = Arc::new(LlmExtractionService::new(
        Arc::clone(&openai_client),
        config.chat_model.clone(),
    ));
    let resolver = Arc::new(
        EntityResolver::new(Arc::clone(&api_state.db))
            .with_llm(openai_client, config.chat_model.clone()),
    );

    let worker_db = Arc::clone(&api_state.db);
    let worker_config = config.clone();
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        info!("Starting worker process");
        if let Err(e) =
            run_worker_loop(worker_db, extractor, resolver, &worker_config, worker_shutdown).await
        {
            error!("Worker process error: {e}");
        }
    });

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
