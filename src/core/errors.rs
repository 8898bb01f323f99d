// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the proxy.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The fingerprint has no entry in the cache.
    #[error("Cache miss")]
    Miss,

    /// The request carried `only-if-cached` and the cache had no fresh entry.
    #[error("Unsatisfiable only-if-cached request")]
    OnlyIfCachedMiss,

    /// The entry exists but is stale beyond what the request tolerates.
    #[error("Cache entry is stale")]
    Stale,

    /// A `no-store` directive or the response status forbids insertion.
    #[error("Response cannot be stored in cache")]
    NotStorable,

    #[error("Store IO error: {0}")]
    StoreIo(Arc<std::io::Error>),

    #[error("Metadata store error: {0}")]
    Database(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// A transport-level failure talking to a backend (connect, reset, DNS).
    #[error("Backend transport error: {0}")]
    Transport(String),

    /// A retryable 5xx returned by a backend (501 and 505 are excluded).
    #[error("Backend returned status {0}")]
    BackendStatus(u16),

    /// A full sweep of the pool found no live backend.
    #[error("No live backend available")]
    NoLiveBackend,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::StoreIo(Arc::new(e))
    }
}

impl From<sled::Error> for ProxyError {
    fn from(e: sled::Error) -> Self {
        ProxyError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        ProxyError::Decode(e.to_string())
    }
}

impl From<bincode::Error> for ProxyError {
    fn from(e: bincode::Error) -> Self {
        ProxyError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::Transport(e.to_string())
    }
}
