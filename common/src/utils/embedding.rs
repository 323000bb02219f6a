use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
    time::{Duration, Instant},
};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, warn};

use crate::{
    error::{AppError, RetryClass},
    utils::config::{AppConfig, EmbeddingBackend},
    utils::tokenizer,
};

/// Upstream refuses inputs longer than this many tokens.
pub const EMBEDDING_MAX_TOKENS: usize = 8191;
/// Upstream hard cap on texts per request, regardless of configuration.
pub const EMBEDDING_BATCH_HARD_CAP: usize = 2048;

#[derive(Debug, Clone, Copy)]
pub struct HealthStatus {
    pub ok: bool,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
    dimension: usize,
    batch_size: usize,
    max_retries: usize,
    timeout: Duration,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAi {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
    },
    /// Deterministic token-bucket vectors. Test and offline use only.
    Hashed,
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        let inner = match config.embedding_backend {
            EmbeddingBackend::Hashed => EmbeddingInner::Hashed,
            EmbeddingBackend::OpenAi => {
                let client = client.unwrap_or_else(|| {
                    Arc::new(Client::with_config(
                        OpenAIConfig::new()
                            .with_api_key(&config.openai_api_key)
                            .with_api_base(&config.openai_base_url),
                    ))
                });
                EmbeddingInner::OpenAi {
                    client,
                    model: config.embedding_model.clone(),
                }
            }
        };

        if config.embedding_dim == 0 {
            return Err(AppError::validation(
                "INVALID_PARAMETER",
                "embedding_dim must be positive",
            ));
        }

        Ok(Self {
            inner,
            dimension: config.embedding_dim,
            batch_size: config.embedding_batch_size.clamp(1, EMBEDDING_BATCH_HARD_CAP),
            max_retries: config.embedding_max_retries,
            timeout: Duration::from_secs(config.embedding_timeout_s),
        })
    }

    /// Deterministic provider used throughout the test suites.
    pub fn new_hashed(dimension: usize) -> Self {
        Self {
            inner: EmbeddingInner::Hashed,
            dimension: dimension.max(1),
            batch_size: 100,
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::OpenAi { .. } => "openai",
            EmbeddingInner::Hashed => "hashed",
        }
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let texts = [text.to_owned()];
        let mut vectors = self.embed_many(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::terminal("INVALID_EMBEDDING", "no embedding data received"))
    }

    /// Embed a list of texts, preserving input order in the output.
    ///
    /// Texts are validated against the per-text token ceiling, then sent in
    /// batches of at most `batch_size`. A batch that still fails after the
    /// retry budget fails the whole call with the batch index in the error.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        for (i, text) in texts.iter().enumerate() {
            let tokens = tokenizer::count(text)?;
            if tokens > EMBEDDING_MAX_TOKENS {
                return Err(AppError::validation(
                    "INVALID_PARAMETER",
                    format!(
                        "input {i} has {tokens} tokens, exceeding the {EMBEDDING_MAX_TOKENS} token ceiling"
                    ),
                ));
            }
        }

        let mut out = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let vectors = self
                .embed_batch_with_retry(batch)
                .await
                .map_err(|err| annotate_batch_failure(err, batch_index))?;
            out.extend(vectors);
        }

        Ok(out)
    }

    pub async fn health_check(&self) -> HealthStatus {
        let probe = ["ping".to_owned()];
        let started = Instant::now();
        match self.embed_batch_once(&probe).await {
            Ok(_) => HealthStatus {
                ok: true,
                latency_ms: duration_millis(started.elapsed()),
            },
            Err(err) => {
                warn!(error = %err, "embedding health check failed");
                HealthStatus {
                    ok: false,
                    latency_ms: duration_millis(started.elapsed()),
                }
            }
        }
    }

    async fn embed_batch_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        // 1s, 2s, 4s between attempts; only the transient class is retried.
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(500)
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            strategy,
            || self.embed_batch_once(batch),
            |err: &AppError| err.retry_class() == RetryClass::Transient,
        )
        .await
    }

    async fn embed_batch_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let vectors = match &self.inner {
            EmbeddingInner::Hashed => batch
                .iter()
                .map(|text| hashed_embedding(text, self.dimension))
                .collect(),
            EmbeddingInner::OpenAi { client, model } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .input(batch.to_vec())
                    .dimensions(u32::try_from(self.dimension).unwrap_or(u32::MAX))
                    .build()?;

                let response = tokio::time::timeout(self.timeout, client.embeddings().create(request))
                    .await
                    .map_err(|_| {
                        AppError::transient("TIMEOUT", "embedding request timed out")
                    })??;

                if response.data.len() != batch.len() {
                    return Err(AppError::terminal(
                        "INVALID_EMBEDDING",
                        format!(
                            "expected {} embeddings, received {}",
                            batch.len(),
                            response.data.len()
                        ),
                    ));
                }

                let mut data = response.data;
                data.sort_by_key(|e| e.index);
                data.into_iter().map(|e| e.embedding).collect::<Vec<_>>()
            }
        };

        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(AppError::terminal(
                    "INVALID_EMBEDDING",
                    format!(
                        "embedding has dimension {}, expected {}",
                        vector.len(),
                        self.dimension
                    ),
                ));
            }
        }

        debug!(
            batch_len = batch.len(),
            backend = self.backend_label(),
            "embedded batch"
        );

        Ok(vectors)
    }
}

fn annotate_batch_failure(err: AppError, batch_index: usize) -> AppError {
    let message = format!("embedding batch {batch_index} failed: {err}");
    match err.retry_class() {
        RetryClass::Transient => AppError::transient("EMBEDDING_BATCH_FAILED", message),
        RetryClass::Validation => err,
        _ => AppError::terminal("EMBEDDING_BATCH_FAILED", message),
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Fold each token into a bucket and L2-normalize the histogram. Stable
/// across runs and platforms, which is all the test suites need.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];

    let mut any = false;
    for token in text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        any = true;
        let mut hasher = DefaultHasher::new();
        token.to_ascii_lowercase().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % dim;
        vector[idx] += 1.0;
    }

    if !any {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}
