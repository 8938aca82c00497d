//! Error envelope for the REST surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::scheduler::EngineError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Wraps the engine taxonomy so handlers can use `?` on both typed engine
/// errors and raw storage errors. Renders as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError(EngineError);

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(EngineError::Validation(message.into()))
    }

    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self(EngineError::NotFound { kind, id })
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(EngineError::Storage(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::Validation(_) | EngineError::InvalidState(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, self.0.to_string()),
            EngineError::Storage(e) => {
                // Internals stay in the log, not the response body.
                error!("storage failure in api handler: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
