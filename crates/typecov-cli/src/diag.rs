//! Optional diagnostics endpoint.
//!
//! Serves the census counters while a run is in progress. Failing to bind
//! is logged and otherwise ignored; the census proceeds without it.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use typecov_core::METRICS;

pub const DEFAULT_DIAG_ADDR: &str = "127.0.0.1:6060";

pub fn router() -> Router {
    Router::new()
        .route("/debug/metrics", get(metrics))
        .route("/debug/health", get(health))
}

async fn metrics() -> String {
    METRICS.render_text()
}

async fn health() -> &'static str {
    "ok\n"
}

/// Bind `addr` and serve in the background.
///
/// Returns `None` when the address cannot be bound.
pub async fn spawn(addr: SocketAddr) -> Option<(SocketAddr, JoinHandle<()>)> {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(%addr, error = %e, "diagnostics endpoint unavailable");
            return None;
        }
    };
    let bound = listener.local_addr().unwrap_or(addr);
    info!(addr = %bound, "diagnostics endpoint listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            warn!(error = %e, "diagnostics endpoint stopped");
        }
    });
    Some((bound, handle))
}
