// src/config.rs

//! Manages server configuration: loading the three JSON files, resolving
//! defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use url::Url;

/// The eviction low-water mark as a fraction of `max_cache_size`.
pub const DEFAULT_FILL_FACTOR: f64 = 0.9;

/// A raw representation of `config.json` before validation and resolution.
/// Field names mirror the on-disk PascalCase keys.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    port: u16,
    /// Interval between health-check rounds, in milliseconds.
    health_check_period: u64,
    /// Aggregate page-store size cap, in bytes.
    max_cache_size: i64,
    /// Interval between evictor ticks, in milliseconds.
    observe_frequency: u64,
    #[serde(default = "default_fill_factor")]
    fill_factor: f64,
    #[serde(default = "default_cert_path")]
    cert_path: String,
    #[serde(default = "default_key_path")]
    key_path: String,
    #[serde(default = "default_metrics_port")]
    metrics_port: u16,
    #[serde(default = "default_cache_data_path")]
    cache_data_path: String,
    #[serde(default = "default_admins_path")]
    admins_path: String,
}

fn default_fill_factor() -> f64 {
    DEFAULT_FILL_FACTOR
}
fn default_cert_path() -> String {
    "resources/Cert.crt".to_string()
}
fn default_key_path() -> String {
    "resources/Key.key".to_string()
}
fn default_metrics_port() -> u16 {
    8081
}
fn default_cache_data_path() -> String {
    "./cache-data".to_string()
}
fn default_admins_path() -> String {
    "./resources/admins.json".to_string()
}

/// The validated load-balancer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub health_check_period: Duration,
    pub max_cache_size: i64,
    pub observe_frequency: Duration,
    pub fill_factor: f64,
    pub cert_path: String,
    pub key_path: String,
    pub metrics_port: u16,
    pub cache_data_path: String,
    pub admins_path: String,
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a JSON file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON from '{path}'"))?;

        let config = Config {
            port: raw.port,
            health_check_period: Duration::from_millis(raw.health_check_period),
            max_cache_size: raw.max_cache_size,
            observe_frequency: Duration::from_millis(raw.observe_frequency),
            fill_factor: raw.fill_factor,
            cert_path: raw.cert_path,
            key_path: raw.key_path,
            metrics_port: raw.metrics_port,
            cache_data_path: raw.cache_data_path,
            admins_path: raw.admins_path,
        };

        config.validate()?;
        Ok(config)
    }

    /// The directory holding the metadata database.
    pub fn database_path(&self) -> String {
        format!("{}/database.db", self.cache_data_path)
    }

    /// The root of the hash-sharded page tree.
    pub fn pages_path(&self) -> String {
        format!("{}/db", self.cache_data_path)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("Port cannot be 0"));
        }
        if self.health_check_period.is_zero() {
            return Err(anyhow!("HealthCheckPeriod cannot be 0"));
        }
        if self.observe_frequency.is_zero() {
            return Err(anyhow!("ObserveFrequency cannot be 0"));
        }
        if self.max_cache_size < 0 {
            return Err(anyhow!("MaxCacheSize cannot be negative"));
        }
        if !(self.fill_factor > 0.0 && self.fill_factor <= 1.0) {
            return Err(anyhow!("FillFactor must be in (0, 1]"));
        }
        if self.metrics_port == 0 {
            return Err(anyhow!("MetricsPort cannot be 0"));
        }
        if self.metrics_port == self.port {
            return Err(anyhow!("MetricsPort cannot be the same as the proxy port"));
        }
        if self.cert_path.trim().is_empty() || self.key_path.trim().is_empty() {
            return Err(anyhow!("CertPath and KeyPath cannot be empty"));
        }
        Ok(())
    }
}

/// One entry of `servers.json`: a single origin backend.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct BackendConfig {
    #[serde(rename = "URL")]
    pub url: String,
    /// TCP connect deadline for health probes, in milliseconds.
    pub health_check_tcp_timeout: u64,
    /// Width of the backend's admission semaphore.
    pub max_requests: usize,
}

impl BackendConfig {
    /// Parses and checks the backend URL.
    pub fn parsed_url(&self) -> Result<Url> {
        let url =
            Url::parse(&self.url).with_context(|| format!("Invalid backend URL '{}'", self.url))?;
        if url.host_str().is_none() {
            return Err(anyhow!("Backend URL '{}' has no host", self.url));
        }
        Ok(url)
    }
}

/// Reads and validates `servers.json`.
pub fn read_backends(path: &str) -> Result<Vec<BackendConfig>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read servers file at '{path}'"))?;
    let backends: Vec<BackendConfig> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse JSON from '{path}'"))?;
    for backend in &backends {
        backend.parsed_url()?;
        if backend.max_requests == 0 {
            return Err(anyhow!(
                "Backend '{}' must allow at least one concurrent request",
                backend.url
            ));
        }
    }
    Ok(backends)
}

/// One entry of `cache_config.json`: the fingerprint recipe for a location.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct CacheRuleConfig {
    pub location: String,
    pub request_key: Vec<String>,
}

/// Reads `cache_config.json`. Extractor specs are validated when the recipes
/// are compiled into the cache engine.
pub fn read_cache_rules(path: &str) -> Result<Vec<CacheRuleConfig>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read cache config at '{path}'"))?;
    let rules: Vec<CacheRuleConfig> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse JSON from '{path}'"))?;
    Ok(rules)
}
