//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`pf_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on core results.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Shown instead of the real message for errors that may leak host details.
pub const GENERIC_SERVER_ERROR: &str = "An unexpected server error occurred.";

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: pf_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: pf_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn inner(&self) -> &pf_core::Error {
        &self.inner
    }

    fn code(&self) -> &'static str {
        match &self.inner {
            pf_core::Error::Validation(_) => "validation_error",
            pf_core::Error::InvalidParameter(_) => "invalid_parameter",
            pf_core::Error::DependencyUnavailable { .. } => "dependency_unavailable",
            pf_core::Error::Tool { .. } => "conversion_failed",
            pf_core::Error::Timeout { .. } => "timeout",
            pf_core::Error::Io { .. } => "io_error",
            pf_core::Error::Internal(_) => "internal_error",
        }
    }
}

impl From<pf_core::Error> for AppError {
    fn from(e: pf_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                request_id = ?self.request_id,
                "Server error in API handler"
            );
        } else {
            tracing::warn!(status = %status, error = %self.inner, "Rejected request");
        }

        let detail = if self.inner.is_internal() {
            GENERIC_SERVER_ERROR.to_string()
        } else {
            self.inner.to_string()
        };

        let body = json!({
            "detail": detail,
            "code": self.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}
