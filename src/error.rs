// Error taxonomy shared by the engine seam and the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request rejected before any engine call was made.
    #[error("invalid request: {0}")]
    InvalidInput(String),

    /// The engine binary could not be started at all. A deployment problem,
    /// not something a retry of the same request will fix.
    #[error("extraction engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine ran and reported failure. Message passed through when the
    /// engine produced one.
    #[error("extraction engine failed: {0}")]
    EngineFailed(String),

    /// The engine reported success but the expected artifact is not on disk.
    /// Fatal for this request only.
    #[error("engine reported success but no output artifact was found")]
    EngineOutputMissing,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Stable machine-readable code for operators and clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::EngineFailed(_) => "engine_failed",
            Self::EngineOutputMissing => "engine_output_missing",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (self.status(), body).into_response()
    }
}
