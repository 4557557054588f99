use crate::services::file_lifecycle::LifecycleError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidFileType(_)
            | LifecycleError::InvalidName(_)
            | LifecycleError::InvalidRecipient(_) => AppError::bad_request(err.to_string()),
            LifecycleError::NotFoundOrForbidden => {
                AppError::new(StatusCode::NOT_FOUND, "file not found")
            }
            LifecycleError::StorageUnavailable(_) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage temporarily unavailable, try again",
            ),
            // Details are already logged; keep internals out of the body.
            LifecycleError::InconsistentState(_) | LifecycleError::Repository(_) => {
                tracing::error!("request failed: {}", err);
                AppError::internal("internal error")
            }
        }
    }
}
