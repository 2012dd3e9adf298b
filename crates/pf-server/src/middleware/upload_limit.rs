//! Early rejection of uploads whose declared size is over the ceiling.
//!
//! Only the `Content-Length` header is inspected here. The multipart reader
//! counts the streamed file bytes and has the final word.

use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Room for multipart boundaries and part headers around the file.
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Reject the request before reading the body if it cannot fit.
pub async fn reject_oversized(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if let Some(len) = declared {
        let allowed = ctx.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD);
        if len > allowed {
            tracing::warn!("Content-Length {len} exceeds {allowed}; rejecting before read");
            let err = pf_core::check_upload_size(len, ctx.config.limits.max_upload_mb)
                .err()
                .unwrap_or_else(|| pf_core::Error::Validation("File too large.".into()));
            let mut err = AppError::new(err);
            if let Some(RequestId(id)) = request.extensions().get::<RequestId>() {
                err = err.with_request_id(id.clone());
            }
            return err.into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use pf_core::config::Config;

    fn app() -> axum::Router {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.limits.max_upload_mb = 1;
        config.storage.temp_dir = dir.path().to_path_buf();
        config.tools.search_path = Some(dir.path().display().to_string());
        crate::router::build_router(AppContext::new(config))
    }

    #[tokio::test]
    async fn declared_oversize_is_rejected_without_reading() {
        let declared = 1024 * 1024 + MULTIPART_OVERHEAD + 1;
        let request = Request::post("/convert/png/lossy/50")
            .header(CONTENT_LENGTH, declared)
            .header("content-type", "multipart/form-data; boundary=x")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key("x-request-id"));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["detail"], "File too large. Max size is 1MB.");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn declared_size_within_slack_passes_through() {
        let request = Request::post("/convert/png/lossy/50")
            .header(CONTENT_LENGTH, 0)
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        // Reaches the handler, which rejects the non-multipart body.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Expected a multipart/form-data upload"));
    }
}
