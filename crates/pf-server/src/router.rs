//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::middleware::upload_limit::{reject_oversized, MULTIPART_OVERHEAD};
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    info(title = "pixforge", description = "Image format conversion service"),
    paths(
        routes::convert::convert,
        routes::health::health_check,
        routes::tools::tools,
    ),
    components(schemas(
        routes::convert::UploadForm,
        routes::convert::ErrorBody,
        routes::health::HealthResponse,
        routes::health::DiskSpace,
        routes::health::ResourceLimits,
        pf_core::TargetFormat,
        pf_core::ConversionMode,
        pf_magick::ToolInfo,
    ))
)]
pub struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(ctx.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    let convert = post(routes::convert::convert)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(ctx.clone(), reject_oversized));

    Router::new()
        .route("/convert/{target_format}/{mode}/{setting}", convert)
        .route("/health", get(routes::health::health_check))
        .route("/api/tools", get(routes::tools::tools))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
