// =============================================================================
// User-facing error kinds — §7 Error Handling Design
// =============================================================================
//
// Internal failures (transient network errors, remote service errors,
// catastrophic per-task exceptions) stay as `anyhow::Error` and are logged;
// they never reach a client. This module only covers the kinds of error the
// Signal API is contractually obligated to report, each carrying its own
// status code and the stable `{error: string}` body shape.
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid API key")]
    AuthFailure,

    #[error("rate limit exceeded")]
    QuotaExceeded { remaining: u32, limit: u32 },

    #[error("malformed request: {0}")]
    MalformedInput(String),

    #[error("feature disabled")]
    FeatureDisabled(&'static str),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::AuthFailure => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
            }
            Self::QuotaExceeded { remaining, limit } => {
                let mut resp =
                    (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": "Rate limit exceeded" })))
                        .into_response();
                let headers = resp.headers_mut();
                headers.insert(
                    "X-RateLimit-Remaining",
                    remaining.to_string().parse().expect("decimal is valid header value"),
                );
                headers.insert(
                    "X-RateLimit-Limit",
                    limit.to_string().parse().expect("decimal is valid header value"),
                );
                resp
            }
            Self::MalformedInput(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Self::FeatureDisabled(msg) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": msg }))).into_response()
            }
            Self::Unavailable(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg }))).into_response()
            }
        }
    }
}
