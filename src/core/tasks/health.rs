// src/core/tasks/health.rs

//! A background task that periodically probes every backend over TCP and
//! assigns the result to its liveness bit.

use crate::core::metrics;
use crate::core::state::ProxyState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// The periodic health checker. The first round runs synchronously during
/// startup (see `server::initialization`) so the pool is populated with live
/// backends before the first request arrives.
pub struct HealthCheckTask {
    state: Arc<ProxyState>,
}

impl HealthCheckTask {
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }

    /// The main run loop for the health checker.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = self.state.config.health_check_period;
        info!("Health checker started (period {:?}).", period);
        let mut interval = tokio::time::interval(period);
        // The synchronous startup round already covered the immediate tick.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    check_all(&self.state).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Health checker shutting down.");
                    return;
                }
            }
        }
    }
}

/// Probes every backend concurrently. Per-backend assignment is serialized by
/// the backend's own probe lock, so overlapping rounds cannot race.
pub async fn check_all(state: &Arc<ProxyState>) {
    let backends = state.pool.snapshot();
    futures::future::join_all(backends.iter().map(|b| b.check_health())).await;

    let alive = backends.iter().filter(|b| b.is_alive()).count();
    metrics::ALIVE_BACKENDS.set(alive as f64);
}
