//! mb-server: HTTP front end of the mediabox streaming engine.
//!
//! This crate ties the engine crates together into a running server. It
//! provides:
//!
//! - Axum routes for metadata, transcoded playback and raw byte ranges
//! - Path resolution that confines every request to a configured root
//! - A custom accept loop that classifies client disconnects
//! - Graceful shutdown that stops the active transcode

pub mod context;
pub mod error;
pub mod middleware;
pub mod paths;
pub mod router;
pub mod routes;

use std::error::Error as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use mb_av::{FfprobeProber, Prober, ToolRegistry};
use mb_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the mediabox server.
///
/// Validates the config, discovers tools, builds the [`AppContext`] and serves
/// until SIGINT/SIGTERM. The active transcode (if any) is stopped before
/// returning.
pub async fn start(config: Config) -> mb_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let tools = ToolRegistry::discover(&config.tools);
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; requests needing it will fail", info.name);
        }
    }

    let prober: Arc<dyn Prober> = Arc::new(FfprobeProber::new(tools.path_or_name("ffprobe")));
    let ctx = AppContext::new(config.clone(), tools, prober)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| mb_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let app = router::build_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| mb_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Listening on {addr}");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    serve(listener, app, cancel).await;

    if let Some(exit) = ctx.supervisor.shutdown().await {
        tracing::info!(?exit, "Stopped active transcode");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Accept connections and serve `app` on each until `cancel` fires.
pub async fn serve(listener: tokio::net::TcpListener, app: Router, cancel: CancellationToken) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(stream, peer, app.clone()));
                    }
                    Err(e) => {
                        tracing::debug!("Accept error: {e}");
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Serve one HTTP/1 connection through hyper/Axum.
///
/// A client that disappears mid-response drops the response body inside
/// hyper, which is what cancels a running transcode; here we only classify
/// and log the transport error.
async fn handle_connection(stream: tokio::net::TcpStream, peer: SocketAddr, app: Router) {
    let io = TokioIo::new(stream);
    let hyper_service = TowerToHyperService::new(app.into_service());

    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, hyper_service)
        .await
    {
        let err = classify_connection_error(&e);
        if err.is_benign() {
            tracing::trace!(%peer, "Connection closed by client: {err}");
        } else {
            tracing::debug!(%peer, "Connection error: {e}");
        }
    }
}

/// Map a hyper connection error onto the engine's error taxonomy.
fn classify_connection_error(err: &hyper::Error) -> mb_core::Error {
    if err.is_incomplete_message() || err.is_canceled() {
        return mb_core::Error::StreamAbort;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return mb_core::Error::from_transport(std::io::Error::new(io.kind(), io.to_string()));
        }
        source = cause.source();
    }

    mb_core::Error::Internal(err.to_string())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM), then cancel `cancel`.
async fn shutdown_signal(cancel: CancellationToken) {
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
        _ = cancel.cancelled() => return,
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
