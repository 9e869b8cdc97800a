//! REST-surface errors and their HTTP rendering.
//!
//! Grounded directly on `apps/inbox-autopilot/daemon/src/error.rs`'s
//! `ApiError`/`IntoResponse` shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Failures surfaced by a REST handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body was malformed or failed validation.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// No creature (or other resource) exists under that name.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request conflicts with existing state (e.g. a duplicate name).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Something failed that the caller can't do anything about.
    #[error("internal: {0}")]
    Internal(String),
    /// A dependency this request needs isn't configured or reachable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    /// Wrap any displayable error as an internal failure.
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let payload = ErrorPayload { error: self.to_string() };
        (status, Json(payload)).into_response()
    }
}
