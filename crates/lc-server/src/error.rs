//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`lc_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on core results. The body
//! carries the id assigned by the request id middleware.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id::current_request_id;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: lc_core::Error,
}

impl AppError {
    pub fn new(inner: lc_core::Error) -> Self {
        Self { inner }
    }
}

impl From<lc_core::Error> for AppError {
    fn from(e: lc_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let request_id = current_request_id();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                request_id = ?request_id,
                "Server error in API handler"
            );
        }

        let code = match &self.inner {
            lc_core::Error::NotFound { .. } => "not_found",
            lc_core::Error::Validation(_) => "validation_error",
            lc_core::Error::Conflict(_) => "conflict",
            lc_core::Error::Io { .. } => "io_error",
            lc_core::Error::Tool { .. } => "tool_error",
            lc_core::Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.inner.to_string(),
            "code": code,
            "request_id": request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}
