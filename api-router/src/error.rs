use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid category: {0}")]
    InvalidCategory(String),
    #[error("invalid artifact type: {0}")]
    InvalidArtifactType(String),
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("database error")]
    Database,
    #[error("extraction error")]
    Extraction,
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidParameter(_) => "INVALID_PARAMETER",
            Self::InvalidCategory(_) => "INVALID_CATEGORY",
            Self::InvalidArtifactType(_) => "INVALID_ARTIFACT_TYPE",
            Self::MissingParameter(_) => "MISSING_PARAMETER",
            Self::Database => "DATABASE_ERROR",
            Self::Extraction => "EXTRACTION_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidParameter(_)
            | Self::InvalidCategory(_)
            | Self::InvalidArtifactType(_)
            | Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Self::Database | Self::Extraction | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<AppError> for ApiError {
    /// Validation and not-found details pass through; everything internal
    /// is logged server-side and surfaced as a generic envelope.
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation { code, message } => match code.as_str() {
                "INVALID_CATEGORY" => Self::InvalidCategory(message),
                "INVALID_ARTIFACT_TYPE" => Self::InvalidArtifactType(message),
                "MISSING_PARAMETER" => Self::MissingParameter(message),
                _ => Self::InvalidParameter(message),
            },
            AppError::Database(_) => {
                tracing::error!("database error: {err:?}");
                Self::Database
            }
            AppError::OpenAI(_) => {
                tracing::error!("upstream LLM error: {err:?}");
                Self::Extraction
            }
            AppError::Terminal { ref code, .. } if code.starts_with("LLM") => {
                tracing::error!("extraction error: {err:?}");
                Self::Extraction
            }
            other => {
                tracing::error!("internal error: {other:?}");
                Self::Internal
            }
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorEnvelope {
    error: String,
    error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
            details: None,
        };

        (self.status(), Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn app_errors_map_to_their_envelope_codes() {
        let err = ApiError::from(AppError::NotFound("event evt_1".into()));
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = ApiError::from(AppError::validation("INVALID_ARTIFACT_TYPE", "bad kind"));
        assert!(matches!(err, ApiError::InvalidArtifactType(_)));

        let err = ApiError::from(AppError::validation("MISSING_PARAMETER", "content"));
        assert!(matches!(err, ApiError::MissingParameter(_)));

        let err = ApiError::from(AppError::validation("INVALID_PARAMETER", "limit"));
        assert!(matches!(err, ApiError::InvalidParameter(_)));

        let err = ApiError::from(AppError::terminal("LLM_SCHEMA", "bad output"));
        assert!(matches!(err, ApiError::Extraction));
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ApiError::from(AppError::Integrity(
            "chunk hash mismatch for art_1::chunk::003".into(),
        ));
        assert_eq!(err.to_string(), "internal server error");
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_codes_follow_the_error_class() {
        assert_eq!(status_of(ApiError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ApiError::InvalidParameter("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::InvalidCategory("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(ApiError::Database), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
