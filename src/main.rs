// src/main.rs

//! The main entry point for the turnpike load balancer.

use anyhow::Result;
use std::env;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*};
use turnpike::config::{self, Config};
use turnpike::server;

const LB_CONFIG_PATH: &str = "./resources/config.json";
const SERVERS_CONFIG_PATH: &str = "./resources/servers.json";
const CACHE_CONFIG_PATH: &str = "./resources/cache_config.json";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("turnpike version {VERSION}");
        return Ok(());
    }

    // The load-balancer config path can be provided via a --config flag;
    // otherwise it defaults to the resources directory.
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or(LB_CONFIG_PATH);

    // Load the configuration files. The server cannot run without them, so
    // a failure here prints the error and exits non-zero.
    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    // Override port if provided as a command-line argument.
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    let backends = match config::read_backends(SERVERS_CONFIG_PATH) {
        Ok(backends) => backends,
        Err(e) => {
            eprintln!("Failed to load servers from \"{SERVERS_CONFIG_PATH}\": {e}");
            std::process::exit(1);
        }
    };

    let cache_rules = match config::read_cache_rules(CACHE_CONFIG_PATH) {
        Ok(rules) => rules,
        Err(e) => {
            eprintln!("Failed to load cache config from \"{CACHE_CONFIG_PATH}\": {e}");
            std::process::exit(1);
        }
    };

    // Setup logging: env var wins, "info" otherwise.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    if let Err(e) = server::run(config, backends, cache_rules).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
