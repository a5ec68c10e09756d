//! Error handling for the engine API

use adaptive_core::{EngineError, InfeasibilityReport, ValidationError};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Blueprint infeasible: {0}")]
    Infeasible(InfeasibilityReport),

    #[error("Empty pool: {0}")]
    EmptyPool(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Validation(e) => Self::Validation(e),
            EngineError::Infeasible(report) => Self::Infeasible(report),
            EngineError::EmptyPool { .. } => Self::EmptyPool(error.to_string()),
            EngineError::UnknownItem(id) => Self::NotFound(format!("item {}", id)),
            EngineError::RefitAborted { .. } | EngineError::VersionConflict { .. } => {
                Self::Conflict(error.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<InfeasibilityReport>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::EmptyPool(_) => (StatusCode::CONFLICT, "empty_pool"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Infeasible(_) => (StatusCode::UNPROCESSABLE_ENTITY, "infeasible"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let message = self.to_string();
        let details = match self {
            ApiError::Infeasible(report) => Some(report),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
