// tests/common/mod.rs

//! Shared helpers for the integration tests: throwaway proxy state rooted in
//! a temp directory, and disposable origin servers on ephemeral ports.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use turnpike::config::{BackendConfig, CacheRuleConfig, Config};
use turnpike::core::auth::AuthService;
use turnpike::core::backend::{Backend, BackendPool};
use turnpike::core::cache::{CacheStore, MetadataStore, PageStore, RecipeBook};
use turnpike::core::state::ProxyState;

/// A config rooted inside the given temp directory.
pub fn test_config(root: &Path, max_cache_size: i64, fill_factor: f64) -> Config {
    Config {
        port: 8443,
        health_check_period: Duration::from_millis(50),
        max_cache_size,
        observe_frequency: Duration::from_millis(50),
        fill_factor,
        cert_path: "unused.crt".to_string(),
        key_path: "unused.key".to_string(),
        metrics_port: 8081,
        cache_data_path: root.join("cache-data").to_string_lossy().into_owned(),
        admins_path: root.join("admins.json").to_string_lossy().into_owned(),
    }
}

/// The `[method, path]` recipe covering every path.
pub fn method_path_rules() -> Vec<CacheRuleConfig> {
    vec![CacheRuleConfig {
        location: "/".to_string(),
        request_key: vec!["method".to_string(), "path".to_string()],
    }]
}

/// Builds a full `ProxyState` without touching the network or environment.
pub fn test_state(
    root: &TempDir,
    max_cache_size: i64,
    fill_factor: f64,
    rules: Vec<CacheRuleConfig>,
    backends: Vec<Arc<Backend>>,
) -> Arc<ProxyState> {
    let config = test_config(root.path(), max_cache_size, fill_factor);
    std::fs::create_dir_all(&config.cache_data_path).unwrap();

    let meta = MetadataStore::open(config.database_path()).unwrap();
    let pages = PageStore::new(config.pages_path());
    let recipes = RecipeBook::from_rules(&rules).unwrap();
    let cache = CacheStore::new(meta, pages, recipes);
    let pool = BackendPool::new(backends);
    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let auth = AuthService::from_file(&config.admins_path, b"test-signing-key").unwrap();

    Arc::new(ProxyState {
        config,
        cache,
        pool,
        http_client,
        auth,
    })
}

/// A backend pointing at `addr` with its liveness bit preset.
pub fn backend_at(addr: SocketAddr, alive: bool) -> Arc<Backend> {
    let config = BackendConfig {
        url: format!("http://{addr}"),
        health_check_tcp_timeout: 1000,
        max_requests: 16,
    };
    let backend = Arc::new(Backend::from_config(&config).unwrap());
    backend.set_alive(alive);
    backend
}

/// A disposable origin server plus its request counter.
pub struct TestOrigin {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl TestOrigin {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Spawns an origin answering every request with the given status, body, and
/// optional `Cache-Control` header.
pub async fn spawn_origin(
    status: StatusCode,
    body: &'static str,
    cache_control: Option<&'static str>,
) -> TestOrigin {
    spawn_origin_with_delay(status, body, cache_control, Duration::ZERO).await
}

/// `spawn_origin` with an artificial response delay, for admission tests.
pub async fn spawn_origin_with_delay(
    status: StatusCode,
    body: &'static str,
    cache_control: Option<&'static str>,
    delay: Duration,
) -> TestOrigin {
    let hits = Arc::new(AtomicUsize::new(0));
    let handler_hits = Arc::clone(&hits);

    let app = axum::Router::new().fallback(move || {
        let hits = Arc::clone(&handler_hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut response = Response::builder().status(status);
            if let Some(value) = cache_control {
                response = response.header("Cache-Control", value);
            }
            response.body(Body::from(body)).unwrap()
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestOrigin { addr, hits }
}

/// Serves the full application router on an ephemeral local port, without
/// the TLS front.
pub async fn spawn_proxy(state: Arc<ProxyState>) -> SocketAddr {
    let router = turnpike::server::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An address nothing is listening on.
pub fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
