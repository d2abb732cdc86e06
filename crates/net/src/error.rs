//! Network error types

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Server lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Core(#[from] cohome_core::Error),
}

/// Error returned by request handlers
#[derive(Debug)]
pub struct ApiError(pub cohome_core::Error);

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError(cohome_core::Error::Unauthorized(message.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError(cohome_core::Error::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        use cohome_core::Error as E;
        match &self.0 {
            E::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            E::Forbidden(_) => StatusCode::FORBIDDEN,
            E::NotFound(_) => StatusCode::NOT_FOUND,
            E::Conflict(_) => StatusCode::CONFLICT,
            E::IntentionsIncomplete(_) | E::Validation(_) => StatusCode::BAD_REQUEST,
            E::Database(_) | E::Io(_) | E::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<cohome_core::Error> for ApiError {
    fn from(err: cohome_core::Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Infrastructure details stay in the log
        let message = if self.0.is_client_error() {
            self.0.to_string()
        } else {
            error!(error = %self.0, "Request failed");
            "internal server error".to_string()
        };
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}
