use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible HTTP embedding API.
    OpenAi,
    /// Deterministic token-bucket vectors; test and offline use only.
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAi
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_embedding_max_retries")]
    pub embedding_max_retries: usize,
    #[serde(default = "default_embedding_timeout_s")]
    pub embedding_timeout_s: u64,
    #[serde(default = "default_single_piece_max_tokens")]
    pub single_piece_max_tokens: usize,
    #[serde(default = "default_chunk_target_tokens")]
    pub chunk_target_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_embedding_dim() -> usize {
    3072
}

fn default_embedding_batch_size() -> usize {
    100
}

fn default_embedding_max_retries() -> usize {
    3
}

fn default_embedding_timeout_s() -> u64 {
    30
}

fn default_single_piece_max_tokens() -> usize {
    1200
}

fn default_chunk_target_tokens() -> usize {
    900
}

fn default_chunk_overlap_tokens() -> usize {
    100
}

fn default_max_content_chars() -> usize {
    2_000_000
}

fn default_rrf_k() -> usize {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_stale_lock_secs() -> u64 {
    600
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

impl Default for AppConfig {
    /// In-memory defaults used by tests; production processes load
    /// `get_config()` instead.
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "memory".into(),
            surrealdb_database: "memory".into(),
            http_port: 0,
            openai_api_key: "test".into(),
            openai_base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_backend: EmbeddingBackend::Hashed,
            embedding_dim: 8,
            embedding_batch_size: default_embedding_batch_size(),
            embedding_max_retries: default_embedding_max_retries(),
            embedding_timeout_s: default_embedding_timeout_s(),
            single_piece_max_tokens: default_single_piece_max_tokens(),
            chunk_target_tokens: default_chunk_target_tokens(),
            chunk_overlap_tokens: default_chunk_overlap_tokens(),
            max_content_chars: default_max_content_chars(),
            rrf_k: default_rrf_k(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}
