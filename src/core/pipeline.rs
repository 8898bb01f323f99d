// src/core/pipeline.rs

//! The proxy handler: cache lookup, backend selection with retries, and the
//! detached cache insertion that follows a successful forward.

use crate::core::backend::ForwardedResponse;
use crate::core::cache::ONLY_IF_CACHED_ERROR;
use crate::core::errors::ProxyError;
use crate::core::metrics;
use crate::core::state::ProxyState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, request::Parts};
use axum::response::Response;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// The axum handler mounted at `/`. Every inbound request flows through here.
pub async fn proxy_handler(State(state): State<Arc<ProxyState>>, request: Request<Body>) -> Response {
    metrics::REQUESTS_TOTAL.inc();
    let _timer = metrics::REQUEST_LATENCY_SECONDS.start_timer();
    handle(state, request).await
}

async fn handle(state: Arc<ProxyState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    match state
        .cache
        .lookup(&parts.method, &parts.uri, &parts.headers)
        .await
    {
        Ok(page) => {
            metrics::CACHE_HITS_TOTAL.inc();
            debug!(path = parts.uri.path(), "serving from cache");
            return replay_cached(page);
        }
        Err(ProxyError::OnlyIfCachedMiss) => {
            return plain_response(StatusCode::GATEWAY_TIMEOUT, ONLY_IF_CACHED_ERROR);
        }
        Err(ProxyError::Miss) | Err(ProxyError::Stale) => {}
        Err(e) => {
            // Store trouble falls through to a regular forward.
            warn!("cache lookup failed: {e}");
        }
    }
    metrics::CACHE_MISSES_TOTAL.inc();

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to read request body: {e}");
            return plain_response(StatusCode::BAD_REQUEST, "HTTP 400 Bad Request");
        }
    };

    forward_with_retries(state, parts, body).await
}

/// Picks backends round-robin until one answers, bounded by the pool size at
/// entry. Transport failures and retryable 5xx statuses move on to the next
/// backend.
async fn forward_with_retries(state: Arc<ProxyState>, parts: Parts, body: Bytes) -> Response {
    let attempts = state.pool.len();

    for _ in 0..attempts {
        let backend = match state.pool.pick_next() {
            Ok(backend) => backend,
            Err(_) => break,
        };

        match backend
            .forward(
                &state.http_client,
                parts.method.clone(),
                &parts.uri,
                &parts.headers,
                body.clone(),
            )
            .await
        {
            Ok(forwarded) => {
                debug!(backend = %backend.url(), status = %forwarded.status, "backend answered");
                spawn_insert(&state, &parts, &forwarded);
                return relay(forwarded);
            }
            Err(ProxyError::Transport(e)) => {
                metrics::BACKEND_FAILURES_TOTAL
                    .with_label_values(&["transport"])
                    .inc();
                warn!(backend = %backend.url(), "transport failure: {e}");
            }
            Err(ProxyError::BackendStatus(status)) => {
                metrics::BACKEND_FAILURES_TOTAL
                    .with_label_values(&["status"])
                    .inc();
                warn!(backend = %backend.url(), status, "backend failure status");
            }
            Err(e) => {
                warn!(backend = %backend.url(), "forward failed: {e}");
            }
        }
    }

    metrics::EXHAUSTED_RETRIES_TOTAL.inc();
    plain_response(StatusCode::BAD_GATEWAY, "HTTP 502 Bad Gateway")
}

/// Kicks off the cache insertion on a detached task. The client is already
/// being served; insertion errors are logged and dropped, and a client
/// disconnect no longer affects this work.
fn spawn_insert(state: &Arc<ProxyState>, parts: &Parts, forwarded: &ForwardedResponse) {
    let status = forwarded.status.as_u16();
    if !(200..400).contains(&status) {
        return;
    }

    let state = Arc::clone(state);
    let method = parts.method.clone();
    let uri = parts.uri.clone();
    let request_headers = parts.headers.clone();
    let response_headers = forwarded.headers.clone();
    let body = forwarded.body.clone();

    tokio::spawn(async move {
        match state
            .cache
            .insert(&method, &uri, &request_headers, status, &response_headers, &body)
            .await
        {
            Ok(()) => debug!(path = uri.path(), "saved response in cache"),
            Err(ProxyError::NotStorable) => {
                debug!(path = uri.path(), "response not storable");
            }
            Err(e) => warn!(path = uri.path(), "cache insert failed: {e}"),
        }
    });
}

/// Serves a cached page. The stored status is not persisted, so replays are
/// always 200.
fn replay_cached(page: crate::core::cache::Page) -> Response {
    let mut response = Response::builder().status(StatusCode::OK);
    if let Some(headers) = response.headers_mut() {
        headers.extend(page.header_map());
    }
    response
        .body(Body::from(page.body))
        .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "cache replay failed"))
}

/// Relays a buffered backend response to the client verbatim.
fn relay(forwarded: ForwardedResponse) -> Response {
    let mut response = Response::builder().status(forwarded.status);
    if let Some(headers) = response.headers_mut() {
        headers.extend(forwarded.headers);
    }
    response
        .body(Body::from(forwarded.body))
        .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "relay failed"))
}

fn plain_response(status: StatusCode, body: &'static str) -> Response {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_default()
}
