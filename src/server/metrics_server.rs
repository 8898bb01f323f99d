// src/server/metrics_server.rs

use crate::core::metrics::gather_metrics;
use crate::core::state::ProxyState;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
///
/// It updates dynamic gauges before gathering all registered metrics and
/// encoding them in the Prometheus text format.
async fn metrics_handler(state: Arc<ProxyState>) -> impl IntoResponse {
    // Update gauges that change frequently before gathering.
    crate::core::metrics::CACHE_SIZE_BYTES.set(state.cache.current_size() as f64);
    let alive = state
        .pool
        .snapshot()
        .iter()
        .filter(|b| b.is_alive())
        .count();
    crate::core::metrics::ALIVE_BACKENDS.set(alive as f64);

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(state: Arc<ProxyState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = state.config.metrics_port;

    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
    {
        error!("Metrics server failed: {}", e);
    }
}
