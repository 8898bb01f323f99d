// src/core/backend/mod.rs

//! A single origin endpoint: liveness flag, TCP health probe, and the
//! admission-gated forward path.

pub mod pool;

pub use pool::BackendPool;

use crate::config::BackendConfig;
use crate::core::errors::ProxyError;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use url::Url;

/// A fully buffered response from an origin, ready to relay and to cache.
#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One origin server known to the pool.
#[derive(Debug)]
pub struct Backend {
    url: Url,
    health_check_tcp_timeout: Duration,
    max_requests: usize,
    /// Liveness bit. Guarded by a mutex so transitions are serialized between
    /// the health checker and the forward path.
    alive: Mutex<bool>,
    /// Serializes probe-and-assign rounds so overlapping ticks cannot race.
    probe_lock: tokio::sync::Mutex<()>,
    /// Bounds concurrent in-flight forwards to this origin.
    semaphore: Semaphore,
}

impl Backend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, ProxyError> {
        let url = config
            .parsed_url()
            .map_err(|e| ProxyError::Config(e.to_string()))?;
        Ok(Self {
            url,
            health_check_tcp_timeout: Duration::from_millis(config.health_check_tcp_timeout),
            max_requests: config.max_requests,
            alive: Mutex::new(false),
            probe_lock: tokio::sync::Mutex::new(()),
            semaphore: Semaphore::new(config.max_requests),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn health_check_tcp_timeout(&self) -> Duration {
        self.health_check_tcp_timeout
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.lock()
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive.lock() = alive;
    }

    /// Attempts a TCP connection to the origin within the configured deadline.
    /// The connection is dropped immediately on success.
    pub async fn probe(&self) -> bool {
        let host = self.url.host_str().unwrap_or_default();
        let port = self.url.port_or_known_default().unwrap_or(80);
        matches!(
            tokio::time::timeout(
                self.health_check_tcp_timeout,
                TcpStream::connect((host, port)),
            )
            .await,
            Ok(Ok(_))
        )
    }

    /// Runs one probe round and assigns the result to the liveness bit.
    pub async fn check_health(&self) {
        let _guard = self.probe_lock.lock().await;
        let alive = self.probe().await;
        self.set_alive(alive);
        if alive {
            info!("[{}] is alive", self.url);
        } else {
            warn!("[{}] is down", self.url);
        }
    }

    /// The request target on this backend: its scheme, host and port joined
    /// with the inbound path and query.
    fn target_url(&self, uri: &Uri) -> Result<Url, ProxyError> {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        self.url
            .join(path_and_query)
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
    }

    /// Forwards a buffered request to this origin through the admission gate.
    ///
    /// A transport-level failure marks the backend down before surfacing the
    /// error. A 5xx status (other than 501 and 505) is reported as
    /// `BackendStatus` so the caller can retry elsewhere; it does not demote.
    /// Cancellation simply drops this future: the permit is released and the
    /// liveness bit is untouched.
    pub async fn forward(
        &self,
        client: &reqwest::Client,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ForwardedResponse, ProxyError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ProxyError::Transport("admission gate closed".to_string()))?;

        let target = self.target_url(uri)?;

        // The Host header must follow the rewritten target.
        let mut headers = headers.clone();
        headers.remove(http::header::HOST);

        let response = match client
            .request(method, target)
            .headers(headers)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.set_alive(false);
                return Err(ProxyError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status.is_server_error()
            && status != StatusCode::NOT_IMPLEMENTED
            && status != StatusCode::HTTP_VERSION_NOT_SUPPORTED
        {
            return Err(ProxyError::BackendStatus(status.as_u16()));
        }

        let response_headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.set_alive(false);
                return Err(ProxyError::Transport(e.to_string()));
            }
        };

        Ok(ForwardedResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}
