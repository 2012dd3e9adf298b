//! pf-server: HTTP API for pixforge.
//!
//! - `POST /convert/{target_format}/{mode}/{setting}` converts an uploaded
//!   image and streams the result back.
//! - `GET /health` reports engine, plugin, disk and limit status.
//! - `GET /api/tools` and `GET /api-docs/openapi.json` for operators.
//!
//! [`start`] binds the listener and serves until Ctrl+C or SIGTERM.

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;

use pf_core::config::Config;

use crate::context::AppContext;

/// Start the pixforge server.
///
/// Creates the workspace root if needed, discovers tools, binds the
/// configured address, and returns after a graceful shutdown.
pub async fn start(config: Config) -> pf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| pf_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let ctx = AppContext::new(config);
    ctx.converter.workspaces().ensure_root()?;

    if let Err(e) = ctx.tools.require(pf_magick::ENGINE) {
        tracing::warn!("{e}; conversions will fail until it is installed");
    }
    if ctx.tools.probe_plugin().is_none() {
        tracing::warn!("{} not found; avif and heif conversions are disabled", pf_magick::PLUGIN);
    }

    let app = router::build_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        "Listening on {addr} (workspace root {}, max upload {}MB, timeout {}s)",
        ctx.converter.workspaces().root().display(),
        ctx.config.limits.max_upload_mb,
        ctx.config.limits.timeout_secs,
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
