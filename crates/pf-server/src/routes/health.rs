//! Health check route.

use std::path::Path;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use pf_magick::{ToolInfo, ENGINE, PLUGIN};

use crate::context::AppContext;

const ENGINE_UNAVAILABLE: &str = "Not available";
const PLUGIN_UNAVAILABLE: &str = "Not available (AVIF/HEIF conversion will fail)";

/// Service and dependency status.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// First line of `magick --version`.
    pub imagemagick: String,
    /// Path of `heif-enc`.
    pub avif_encoder: String,
    pub disk_space: DiskSpace,
    pub resource_limits: ResourceLimits,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DiskSpace {
    pub free_mb: f64,
    pub temp_dir: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ResourceLimits {
    pub max_file_size_mb: u64,
    pub timeout_seconds: u64,
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 500, description = "The health probe itself failed")
    )
)]
pub async fn health_check(State(ctx): State<AppContext>) -> Response {
    match probe(&ctx).await {
        Ok(health) => Json(health).into_response(),
        Err(e) => {
            tracing::error!("Health check failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "unhealthy", "error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn probe(ctx: &AppContext) -> pf_core::Result<HealthResponse> {
    let infos = ctx.tools.check_all().await;
    let find = |name: &str| infos.iter().find(|i| i.name == name && i.available);

    let imagemagick = find(ENGINE)
        .and_then(|i| i.version.clone())
        .unwrap_or_else(|| ENGINE_UNAVAILABLE.to_string());
    let avif_encoder = find(PLUGIN)
        .and_then(tool_path)
        .unwrap_or_else(|| PLUGIN_UNAVAILABLE.to_string());

    let temp_dir = &ctx.config.storage.temp_dir;
    let free_bytes = free_space(temp_dir)?;
    let free_mb = (free_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;

    Ok(HealthResponse {
        status: "healthy".into(),
        imagemagick,
        avif_encoder,
        disk_space: DiskSpace {
            free_mb,
            temp_dir: temp_dir.display().to_string(),
        },
        resource_limits: ResourceLimits {
            max_file_size_mb: ctx.config.limits.max_upload_mb,
            timeout_seconds: ctx.config.limits.timeout_secs,
        },
    })
}

fn tool_path(info: &ToolInfo) -> Option<String> {
    info.path.as_ref().map(|p| p.display().to_string())
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
fn free_space(path: &Path) -> pf_core::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|e| pf_core::Error::Io {
        source: std::io::Error::from(e),
    })?;
    Ok((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64))
}

#[cfg(not(unix))]
fn free_space(path: &Path) -> pf_core::Result<u64> {
    std::fs::metadata(path)?;
    Ok(0)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn free_space_of_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(free_space(dir.path()).unwrap() > 0);
    }

    #[test]
    fn free_space_of_missing_dir_fails() {
        assert!(free_space(Path::new("/nonexistent/pixforge")).is_err());
    }
}
