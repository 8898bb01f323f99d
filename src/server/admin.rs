// src/server/admin.rs

//! The admin surface: bearer-token middleware, server-pool management, and
//! the signin/signup/password endpoints.

use crate::config::BackendConfig;
use crate::core::backend::Backend;
use crate::core::errors::ProxyError;
use crate::core::state::ProxyState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Middleware guarding the protected admin routes. The handlers behind it
/// only ever see authenticated requests.
pub async fn require_auth(
    State(state): State<Arc<ProxyState>>,
    request: Request,
    next: Next,
) -> Response {
    let authenticated = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| state.auth.verify_token(token).is_ok());

    if !authenticated {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}

/// One backend as reported by `GET /serverPool`.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub url: String,
    pub alive: bool,
    pub health_check_tcp_timeout_ms: u64,
    pub max_requests: usize,
}

pub async fn list_servers(State(state): State<Arc<ProxyState>>) -> Json<Vec<ServerInfo>> {
    let servers = state
        .pool
        .snapshot()
        .iter()
        .map(|b| ServerInfo {
            url: b.url().to_string(),
            alive: b.is_alive(),
            health_check_tcp_timeout_ms: b.health_check_tcp_timeout().as_millis() as u64,
            max_requests: b.max_requests(),
        })
        .collect();
    Json(servers)
}

/// Adds a backend to the pool. The new backend starts out down and is probed
/// immediately rather than waiting for the next health round.
pub async fn add_server(
    State(state): State<Arc<ProxyState>>,
    Json(config): Json<BackendConfig>,
) -> Response {
    let backend = match Backend::from_config(&config) {
        Ok(backend) => Arc::new(backend),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    if let Err(e) = state.pool.add(Arc::clone(&backend)) {
        return (StatusCode::CONFLICT, e.to_string()).into_response();
    }
    info!("[{}] added to the pool", backend.url());

    tokio::spawn(async move { backend.check_health().await });
    StatusCode::CREATED.into_response()
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    #[serde(rename = "URL")]
    pub url: String,
}

pub async fn remove_server(
    State(state): State<Arc<ProxyState>>,
    Json(request): Json<RemoveRequest>,
) -> Response {
    match state.pool.remove(&request.url) {
        Ok(()) => {
            info!("[{}] removed from the pool", request.url);
            StatusCode::OK.into_response()
        }
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

pub async fn sign_in(
    State(state): State<Arc<ProxyState>>,
    Json(credentials): Json<Credentials>,
) -> Response {
    match state
        .auth
        .sign_in(&credentials.username, &credentials.password)
        .await
    {
        Ok(token) => Json(TokenResponse { token }).into_response(),
        Err(_) => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
    }
}

pub async fn sign_up(
    State(state): State<Arc<ProxyState>>,
    Json(credentials): Json<Credentials>,
) -> Response {
    match state
        .auth
        .add_admin(&credentials.username, &credentials.password)
        .await
    {
        Ok(()) => {
            info!("admin '{}' created", credentials.username);
            StatusCode::CREATED.into_response()
        }
        Err(ProxyError::InvalidRequest(e)) => (StatusCode::CONFLICT, e).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub username: String,
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<ProxyState>>,
    Json(change): Json<PasswordChange>,
) -> Response {
    match state
        .auth
        .change_password(&change.username, &change.old_password, &change.new_password)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(ProxyError::Unauthorized) => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
