use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::error::AppError;

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable code; clients branch on this, never on the
    /// message text.
    pub code: &'static str,
    pub message: String,
    /// Whether retrying the same request may succeed without changes.
    pub retryable: bool,
}

/// Map domain errors to HTTP responses
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let response = ErrorResponse {
        error: ErrorBody {
            code: err.code(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        },
    };
    (status, response)
}

pub fn into_response(err: AppError) -> axum::response::Response {
    if err.status_code() >= 500 {
        tracing::error!(code = err.code(), error = %err, "request failed");
    }
    let (status, body) = map_error(&err);
    (status, Json(body)).into_response()
}
