//! Request-level error taxonomy. Probe-level conditions (unreachable
//! target, timed-out wait, unparseable body) terminate inside
//! `ProbeResult` values at the point of occurrence and never reach this
//! type; what remains is the small set of failures a single endpoint can
//! answer with directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0} cannot be opened")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Internal detail stays in the log; the body carries a generic line.
        let detail = match &self {
            ApiError::Internal(e) => {
                error!("internal error: {e:#}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (
            self.status(),
            Json(json!({ "error": self.kind(), "detail": detail })),
        )
            .into_response()
    }
}
