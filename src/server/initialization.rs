// src/server/initialization.rs

//! Handles the complete server initialization process: TLS setup, state
//! construction, cache size recompute, the synchronous first health round,
//! and binding the listener.

use super::context::ServerContext;
use crate::config::{BackendConfig, CacheRuleConfig, Config};
use crate::core::state::ProxyState;
use crate::core::tasks::health;
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(
    config: Config,
    backends: &[BackendConfig],
    cache_rules: &[CacheRuleConfig],
) -> Result<ServerContext> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let acceptor = setup_tls(&config)?;

    let state = ProxyState::initialize(config, backends, cache_rules)?;
    info!("Server state initialized.");

    let size = state.cache.recompute_size().await?;
    info!("Cache holds {} bytes of pages on disk.", size);

    // Identify the working backends before accepting traffic.
    info!("Configured! Now setting up the first health check...");
    health::check_all(&state).await;
    info!("Ready!");

    let listener = TcpListener::bind(("0.0.0.0", state.config.port)).await?;
    info!("Load balancer listening on :{}", state.config.port);

    Ok(ServerContext {
        state,
        listener,
        acceptor,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Builds the TLS acceptor from the configured certificate/key pair. The
/// proxy only ever serves HTTPS, so a missing pair is fatal.
fn setup_tls(config: &Config) -> Result<TlsAcceptor> {
    info!("Loading TLS certificate and key.");
    let certs = load_certs(&config.cert_path)?;
    let key = load_key(&config.key_path)?;
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}
