//! HTTP-facing error type.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::core::realtime::RealtimeError;
use crate::core::workouts::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(detail) => {
                error!(error = %detail, "Internal server error");
                "An internal server error occurred.".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => AppError::BadRequest(message),
            StoreError::Unavailable(message) => AppError::ServiceUnavailable(message),
            StoreError::Rejected { status, message } if status == 404 => {
                AppError::NotFound(message)
            }
            StoreError::Rejected { message, .. } => AppError::BadGateway(message),
            StoreError::Decode(message) => AppError::BadGateway(message),
        }
    }
}

impl From<RealtimeError> for AppError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::InvalidConfiguration(message) => AppError::ServiceUnavailable(message),
            RealtimeError::InvalidState { .. } | RealtimeError::InvalidInput(_) => {
                AppError::BadRequest(err.to_string())
            }
            other => AppError::BadGateway(other.to_string()),
        }
    }
}
