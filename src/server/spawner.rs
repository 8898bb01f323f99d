// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::tasks::eviction::EvictionTask;
use crate::core::tasks::health::HealthCheckTask;
use anyhow::Result;

/// Spawns all critical background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    let metrics_state = state.clone();
    let shutdown_rx_metrics = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
        Ok(())
    });

    // --- Health Checker ---
    let health_task = HealthCheckTask::new(state.clone());
    let shutdown_rx_health = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        health_task.run(shutdown_rx_health).await;
        Ok(())
    });

    // --- Evictor ---
    let eviction_task = EvictionTask::new(state.clone());
    let shutdown_rx_evict = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        eviction_task.run(shutdown_rx_evict).await;
        Ok(())
    });

    Ok(())
}
