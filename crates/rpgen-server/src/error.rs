//! Error types for builds and for the HTTP surface.
//!
//! [`BuildError`] is what `build()` returns: a structural defect of the
//! graph, a checkpoint failure, a bad config, or a crashed worker. Failed
//! and blocked nodes are not errors; they are reported in the
//! [`GenerationReport`](crate::report::GenerationReport).
//!
//! [`ApiError`] is the unified error type for all API endpoints. It
//! implements `axum::response::IntoResponse` to produce structured JSON
//! error responses with appropriate HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use rpgen_core::{CoreError, Violation};
use rpgen_storage::StorageError;

use crate::jobs::JobError;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid build configuration: {0}")]
    Config(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Structured error detail in API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "BAD_REQUEST").
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Entity not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The graph has structural violations (422).
    #[error("validation failed")]
    ValidationFailed(Vec<Violation>),

    /// Internal server error (500).
    #[error("internal error: {0}")]
    InternalError(String),

    /// Resource conflict (409).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, ApiErrorDetail) {
        let detail = |code: &str, message: String, details: Option<serde_json::Value>| {
            ApiErrorDetail {
                code: code.to_string(),
                message,
                details,
            }
        };
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, detail("NOT_FOUND", msg.clone(), None)),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, detail("BAD_REQUEST", msg.clone(), None))
            }
            ApiError::ValidationFailed(violations) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                detail(
                    "VALIDATION_FAILED",
                    format!("{} violation(s)", violations.len()),
                    serde_json::to_value(violations).ok(),
                ),
            ),
            ApiError::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                detail("INTERNAL_ERROR", msg.clone(), None),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, detail("CONFLICT", msg.clone(), None)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = self.parts();
        let body = serde_json::json!({
            "success": false,
            "error": detail,
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::GraphNotBuildable { violations } => ApiError::ValidationFailed(violations),
            CoreError::NodeNotFound { .. } => ApiError::NotFound(err.to_string()),
            CoreError::DuplicateNode { .. } | CoreError::ParentConflict { .. } => {
                ApiError::Conflict(err.to_string())
            }
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::RunNotFound(_) | StorageError::NodeNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            StorageError::IntegrityError { .. } => ApiError::Conflict(err.to_string()),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Core(core) => core.into(),
            BuildError::Storage(storage) => storage.into(),
            BuildError::Config(msg) => ApiError::BadRequest(msg),
            BuildError::Worker(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::StillRunning(_) => ApiError::Conflict(err.to_string()),
        }
    }
}
