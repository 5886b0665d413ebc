//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::store::StateFileError;
use crate::trigger::TriggerError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("sync already running")]
    AlreadyRunning,

    #[error("State error: {0}")]
    State(#[from] StateFileError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl From<TriggerError> for AppError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::AlreadyRunning => AppError::AlreadyRunning,
            TriggerError::State(e) => AppError::State(e),
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::AlreadyRunning => (StatusCode::CONFLICT, self.to_string(), None),
            AppError::State(e) => {
                tracing::error!("State error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "State error".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
