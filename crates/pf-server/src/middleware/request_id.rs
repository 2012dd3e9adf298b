//! Per-request correlation id.
//!
//! The id tags the `request` span, every error body and the `x-request-id`
//! response header. A caller-supplied id is kept only if it is short printable
//! ASCII, so it can be echoed into logs and headers verbatim.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_INBOUND_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    fn from_header(value: Option<&HeaderValue>) -> Self {
        let inbound = value
            .and_then(|v| v.to_str().ok())
            .filter(|v| acceptable(v))
            .map(str::to_owned);
        Self(inbound.unwrap_or_else(|| Uuid::new_v4().to_string()))
    }
}

fn acceptable(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_INBOUND_LEN && id.bytes().all(|b| b.is_ascii_graphic())
}

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = RequestId::from_header(request.headers().get(&X_REQUEST_ID));
    let span = tracing::info_span!(
        "request",
        request_id = %id.0,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let header = HeaderValue::from_str(&id.0).ok();
    request.extensions_mut().insert(id);

    let mut response = next.run(request).instrument(span).await;
    if let Some(header) = header {
        response.headers_mut().insert(X_REQUEST_ID.clone(), header);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_for(raw: &str) -> String {
        RequestId::from_header(Some(&HeaderValue::from_str(raw).unwrap())).0
    }

    #[test]
    fn caller_id_is_kept() {
        assert_eq!(id_for("trace-me-42"), "trace-me-42");
    }

    #[test]
    fn unusable_ids_are_replaced() {
        let long = "x".repeat(MAX_INBOUND_LEN + 1);
        for raw in ["", "has space", long.as_str()] {
            let id = id_for(raw);
            assert_ne!(id, raw);
            assert!(Uuid::parse_str(&id).is_ok(), "{id}");
        }
    }

    #[test]
    fn missing_header_gets_uuid() {
        let id = RequestId::from_header(None).0;
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
