mod common;

use common::{backend_at, dead_addr, method_path_rules, spawn_origin, spawn_proxy, test_state};
use axum::http::StatusCode;
use http::{HeaderMap, Method, Uri};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use turnpike::core::state::ProxyState;

fn proxy_url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

async fn wait_for_cached(state: &Arc<ProxyState>, path: &str) {
    let uri: Uri = path.parse().unwrap();
    for _ in 0..100 {
        if state
            .cache
            .lookup(&Method::GET, &uri, &HeaderMap::new())
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("response for {path} never arrived in the cache");
}

#[tokio::test]
async fn test_cold_miss_then_warm_hit() {
    let dir = TempDir::new().unwrap();
    let origin = spawn_origin(StatusCode::OK, "abc", Some("max-age=60")).await;
    let state = test_state(
        &dir,
        1 << 20,
        0.9,
        method_path_rules(),
        vec![backend_at(origin.addr, true)],
    );
    let proxy = spawn_proxy(state.clone()).await;
    let client = reqwest::Client::new();

    let first = client.get(proxy_url(proxy, "/x")).send().await.unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::OK);
    assert_eq!(first.text().await.unwrap(), "abc");
    assert_eq!(origin.hit_count(), 1);

    // The insertion is detached from the request; wait for it to land.
    wait_for_cached(&state, "/x").await;

    let second = client.get(proxy_url(proxy, "/x")).send().await.unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::OK);
    assert_eq!(second.text().await.unwrap(), "abc");
    assert_eq!(origin.hit_count(), 1, "warm hit must not reach the origin");
}

#[tokio::test]
async fn test_only_if_cached_miss_returns_504_with_fixed_body() {
    let dir = TempDir::new().unwrap();
    let origin = spawn_origin(StatusCode::OK, "abc", Some("max-age=60")).await;
    let state = test_state(
        &dir,
        1 << 20,
        0.9,
        method_path_rules(),
        vec![backend_at(origin.addr, true)],
    );
    let proxy = spawn_proxy(state).await;

    let response = reqwest::Client::new()
        .get(proxy_url(proxy, "/y"))
        .header("Cache-Control", "only-if-cached")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(
        response.text().await.unwrap(),
        "HTTP 504 Unsatisfiable Request (only-if-cached)"
    );
    assert_eq!(origin.hit_count(), 0, "the backend must stay untouched");
}

#[tokio::test]
async fn test_5xx_answer_retries_on_the_next_backend() {
    let dir = TempDir::new().unwrap();
    let failing = spawn_origin(StatusCode::SERVICE_UNAVAILABLE, "bad", None).await;
    let healthy = spawn_origin(StatusCode::OK, "ok", None).await;

    // The cursor starts one past the head, so the failing origin is tried
    // first.
    let healthy_backend = backend_at(healthy.addr, true);
    let failing_backend = backend_at(failing.addr, true);
    let state = test_state(
        &dir,
        1 << 20,
        0.9,
        method_path_rules(),
        vec![healthy_backend.clone(), failing_backend.clone()],
    );
    let proxy = spawn_proxy(state).await;

    let response = reqwest::Client::new()
        .get(proxy_url(proxy, "/z"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
    assert_eq!(failing.hit_count(), 1);
    assert_eq!(healthy.hit_count(), 1);
    // A retried 5xx is not a down signal.
    assert!(failing_backend.is_alive());
    assert!(healthy_backend.is_alive());
}

#[tokio::test]
async fn test_transport_failure_demotes_and_probe_restores() {
    let dir = TempDir::new().unwrap();
    let healthy = spawn_origin(StatusCode::OK, "ok", None).await;
    let unreachable = dead_addr();

    let healthy_backend = backend_at(healthy.addr, true);
    let broken_backend = backend_at(unreachable, true);
    let state = test_state(
        &dir,
        1 << 20,
        0.9,
        method_path_rules(),
        vec![healthy_backend.clone(), broken_backend.clone()],
    );
    let proxy = spawn_proxy(state).await;

    let response = reqwest::Client::new()
        .get(proxy_url(proxy, "/z"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
    assert!(!broken_backend.is_alive(), "transport failure must demote");
    assert!(healthy_backend.is_alive());

    // Something starts listening at the address again; the next probe round
    // brings the backend back.
    let _revived = tokio::net::TcpListener::bind(unreachable).await.unwrap();
    broken_backend.check_health().await;
    assert!(broken_backend.is_alive());
}

#[tokio::test]
async fn test_exhausted_pool_returns_502() {
    let dir = TempDir::new().unwrap();
    let state = test_state(
        &dir,
        1 << 20,
        0.9,
        method_path_rules(),
        vec![backend_at(dead_addr(), false), backend_at(dead_addr(), false)],
    );
    let proxy = spawn_proxy(state).await;

    let response = reqwest::Client::new()
        .get(proxy_url(proxy, "/z"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_empty_pool_returns_502() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, 1 << 20, 0.9, method_path_rules(), vec![]);
    let proxy = spawn_proxy(state).await;

    let response = reqwest::Client::new()
        .get(proxy_url(proxy, "/anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_favicon_is_served_as_404() {
    let dir = TempDir::new().unwrap();
    let origin = spawn_origin(StatusCode::OK, "nope", None).await;
    let state = test_state(
        &dir,
        1 << 20,
        0.9,
        method_path_rules(),
        vec![backend_at(origin.addr, true)],
    );
    let proxy = spawn_proxy(state).await;

    let response = reqwest::Client::new()
        .get(proxy_url(proxy, "/favicon.ico"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(origin.hit_count(), 0);
}

#[tokio::test]
async fn test_non_storable_responses_are_served_but_not_cached() {
    let dir = TempDir::new().unwrap();
    let origin = spawn_origin(StatusCode::OK, "secret", Some("no-store")).await;
    let state = test_state(
        &dir,
        1 << 20,
        0.9,
        method_path_rules(),
        vec![backend_at(origin.addr, true)],
    );
    let proxy = spawn_proxy(state.clone()).await;
    let client = reqwest::Client::new();

    for expected_hits in 1..=2 {
        let response = client.get(proxy_url(proxy, "/secret")).send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "secret");
        assert_eq!(origin.hit_count(), expected_hits);
    }
    assert_eq!(state.cache.current_size(), 0);
}
