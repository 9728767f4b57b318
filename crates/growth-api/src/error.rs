//! Error types for the gateway API layer.
//!
//! [`ApiError`] unifies every failure a handler can report before a
//! stream starts and converts into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.
//! Once a stream is open, failures travel as `error` stream messages
//! instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use growth_core::EngineError;

/// Errors that can occur in the gateway API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body or its values were rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An invalid query parameter was provided.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A UUID could not be parsed from the request path.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    /// The calculation store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        if err.is_invalid_input() {
            Self::InvalidInput(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<growth_db::DbError> for ApiError {
    fn from(err: growth_db::DbError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidInput(msg) | Self::InvalidQuery(msg) | Self::InvalidUuid(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            Self::StoreUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
