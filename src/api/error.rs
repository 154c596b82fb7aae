//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::RepositoryError;
use crate::pipeline::PipelineError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid secret")]
    InvalidSecret,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Inference service not available")]
    InferenceUnavailable,
    #[error("Encryption failure: {0}")]
    EncryptionFailure(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication required".to_string(),
            ),
            ApiError::InvalidSecret => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SECRET",
                "Invalid secret".to_string(),
            ),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::InferenceUnavailable => (
                StatusCode::BAD_GATEWAY,
                "INFERENCE_UNAVAILABLE",
                "Inference server not available".to_string(),
            ),
            ApiError::EncryptionFailure(detail) => {
                tracing::error!(detail, "Patient data encryption failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ENCRYPTION_FAILURE",
                    "Patient data could not be encrypted or decrypted".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NoteNotFound(id) => {
                ApiError::NotFound(format!("Patient note not found: {}", crate::models::short_digest(&id)))
            }
            PipelineError::PatientNotFound(_) => ApiError::NotFound("Patient not found".into()),
            PipelineError::Crypto(e) | PipelineError::Repository(RepositoryError::Crypto(e)) => {
                ApiError::EncryptionFailure(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}
