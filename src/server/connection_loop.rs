// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling
//! graceful shutdown.

use super::context::ServerContext;
use super::router::build_router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Waits for a shutdown signal. On Unix this listens for SIGINT and SIGTERM.
#[cfg(unix)]
async fn await_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }
}

/// Waits for a shutdown signal. On Windows this listens for Ctrl+C.
#[cfg(windows)]
async fn await_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to create Ctrl+C stream");
    info!("Ctrl-C received, initiating graceful shutdown.");
}

/// The main server loop that accepts connections, performs the TLS handshake,
/// and serves HTTP over each stream until shutdown.
pub async fn run(mut ctx: ServerContext) {
    let router = build_router(ctx.state.clone());
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased; // Prioritize shutdown signals over other events.

            _ = await_shutdown_signal() => {
                break;
            },

            // Monitor background tasks for unexpected termination.
            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("A background task has completed."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            // Accept new incoming TCP connections.
            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        let acceptor = ctx.acceptor.clone();
                        let service = TowerToHyperService::new(router.clone());

                        client_tasks.spawn(async move {
                            match acceptor.accept(socket).await {
                                Ok(tls_stream) => {
                                    let io = TokioIo::new(tls_stream);
                                    if let Err(e) = ConnectionBuilder::new(TokioExecutor::new())
                                        .serve_connection_with_upgrades(io, service)
                                        .await
                                    {
                                        warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                                    }
                                }
                                Err(e) => {
                                    warn!("TLS handshake error for {addr}: {e}");
                                }
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            // Reap completed client tasks.
            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!("A connection handler panicked: {e:?}");
                    }
                }
            },
        }
    }

    // --- Graceful Shutdown Sequence ---
    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
    }

    client_tasks.shutdown().await;
    info!("All client connections closed.");

    if let Err(e) = ctx.state.cache.meta().flush() {
        error!("Failed to flush metadata store on shutdown: {}", e);
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}
