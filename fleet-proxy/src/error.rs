//! Proxy-boundary errors and their HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures that stop the admission pipeline before an upstream
/// response (verbatim or translated) can be returned.
#[non_exhaustive]
#[derive(Debug)]
pub enum ProxyError {
    /// Body failed to parse as a source-format request.
    BadRequest(String),
    /// The creature is over its `sleep`-action daily budget.
    BudgetExceeded { creature: String },
    /// The upstream this model routes to has no configured API key.
    MissingCredentials,
    /// Network error reaching the upstream, or an unparsable upstream body.
    UpstreamUnreachable(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ProxyError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "type": "invalid_request_error", "message": msg })),
            ProxyError::BudgetExceeded { creature } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "type": "rate_limit_error", "message": format!("{creature} is over its daily budget") }),
            ),
            ProxyError::MissingCredentials => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "type": "api_error", "message": "no credentials configured for this model's upstream" }),
            ),
            ProxyError::UpstreamUnreachable(msg) => (StatusCode::BAD_GATEWAY, json!({ "type": "api_error", "message": msg })),
        };
        (status, Json(body)).into_response()
    }
}
