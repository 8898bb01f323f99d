// src/server/mod.rs

use crate::config::{BackendConfig, CacheRuleConfig, Config};
use anyhow::Result;

mod admin;
mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod router;
mod spawner;

pub use router::build_router;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    backends: Vec<BackendConfig>,
    cache_rules: Vec<CacheRuleConfig>,
) -> Result<()> {
    // 1. Initialize TLS, state, stores, and run the first health round.
    let mut server_context = initialization::setup(config, &backends, &cache_rules).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context)?;

    // 3. Start the main connection acceptance loop. Runs until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
