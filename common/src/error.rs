use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Coarse failure classes used to route errors at the call boundary: the
/// worker turns `Transient` into a queue retry, everything else either
/// surfaces to the caller or marks the job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Validation,
    NotFound,
    Transient,
    Terminal,
    Integrity,
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error [{code}]: {message}")]
    Validation { code: String, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient error [{code}]: {message}")]
    Transient { code: String, message: String },
    #[error("terminal error [{code}]: {message}")]
    Terminal { code: String, message: String },
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn terminal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Terminal {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Project the error onto the retry taxonomy.
    ///
    /// Store and network failures default to `Transient`; schema and
    /// authentication failures from the LLM side are `Terminal`.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Validation { .. } => RetryClass::Validation,
            Self::NotFound(_) => RetryClass::NotFound,
            Self::Transient { .. } => RetryClass::Transient,
            Self::Terminal { .. } => RetryClass::Terminal,
            Self::Integrity(_) => RetryClass::Integrity,
            Self::Database(_) | Self::Io(_) => RetryClass::Transient,
            Self::OpenAI(err) => classify_openai(err),
            Self::Json(_) | Self::Join(_) | Self::Anyhow(_) => RetryClass::Terminal,
        }
    }

    /// Machine-readable code for the RPC error envelope.
    pub fn error_code(&self) -> String {
        match self {
            Self::Validation { code, .. } => code.clone(),
            Self::NotFound(_) => "NOT_FOUND".to_owned(),
            Self::Transient { code, .. } | Self::Terminal { code, .. } => code.clone(),
            Self::Database(_) => "DATABASE_ERROR".to_owned(),
            Self::OpenAI(_) => "EXTRACTION_ERROR".to_owned(),
            Self::Integrity(_) | Self::Io(_) | Self::Json(_) | Self::Join(_) | Self::Anyhow(_) => {
                "INTERNAL_ERROR".to_owned()
            }
        }
    }
}

/// Map an upstream OpenAI-compatible API failure onto the retry taxonomy.
///
/// Rate limits, timeouts, connection resets and 5xx-style server errors are
/// retryable; authentication and request validation failures are not.
fn classify_openai(err: &OpenAIError) -> RetryClass {
    match err {
        // Timeouts, resets, and other connection-level failures.
        OpenAIError::Reqwest(inner) => {
            if inner.is_builder() {
                RetryClass::Terminal
            } else {
                RetryClass::Transient
            }
        }
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or_default();
            if kind.contains("rate_limit")
                || kind.contains("server_error")
                || kind.contains("overloaded")
                || api.message.to_lowercase().contains("rate limit")
            {
                RetryClass::Transient
            } else {
                RetryClass::Terminal
            }
        }
        _ => RetryClass::Terminal,
    }
}
