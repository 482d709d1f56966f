//! lc-server: HTTP API, stream session manager, and upload store.
//!
//! This crate ties the other lc-* crates into a running server
//! application. It provides:
//!
//! - The [`session::SessionManager`] that supervises the single encoder
//! - The [`media::MediaStore`] for the upload directory and its sweep
//! - Axum-based HTTP API with SSE for events and live logs
//! - A background sweeper for expired uploads
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod media;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod session;
pub mod sweeper;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use lc_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the loopcast server.
///
/// Discovers tools, sweeps the upload directory, builds the [`AppContext`],
/// and serves HTTP until a shutdown signal arrives. On shutdown the running
/// session (if any) is stopped before returning.
pub async fn start(config: Config, config_path: Option<PathBuf>) -> lc_core::Result<()> {
    // Validate configuration.
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }
    if let Some(ref path) = config_path {
        tracing::debug!("Configuration loaded from {}", path.display());
    }

    // Discover external tools.
    let tools = lc_av::ToolRegistry::discover(&config.tools);
    for info in tools.check_all().await {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else if info.name == "ffmpeg" {
            tracing::warn!("ffmpeg not found; sessions will fail to start until it is installed");
        } else {
            tracing::debug!("Tool not found: {}", info.name);
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| lc_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let static_dir = config.server.static_dir.clone();
    let stop_grace = config.stream.stop_grace();

    let ctx = AppContext::new(config, tools);

    // Prepare the upload directory and drop anything already expired.
    ctx.media.ensure_dir().await?;
    let removed = ctx.media.sweep(ctx.config.media.retention()).await?;
    tracing::info!(
        dir = %ctx.media.dir().display(),
        swept = removed.len(),
        "Upload directory ready"
    );

    // Cancellation token for graceful shutdown.
    let cancel = ctx.shutdown.clone();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_cancel.clone()).await;
        signal_cancel.cancel();
    });

    let sweeper_ctx = ctx.clone();
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper::run_sweeper(sweeper_ctx, sweeper_cancel).await;
    });

    let app = router::build_router(ctx.clone(), static_dir);

    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| lc_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await;

    // Make sure background tasks stop, then take the encoder down with us.
    cancel.cancel();
    ctx.sessions.shutdown(stop_grace + Duration::from_secs(1)).await;
    let _ = sweeper_handle.await;

    served.map_err(|e| lc_core::Error::Internal(format!("Server error: {e}")))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
