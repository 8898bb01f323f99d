// src/server/router.rs

//! Assembles the axum router served on the HTTPS listener: the proxy path,
//! the favicon stub, and the token-protected admin surface.

use super::admin;
use crate::core::pipeline;
use crate::core::state::ProxyState;
use axum::http::StatusCode;
use axum::routing::{any, get, post};
use axum::{Router, middleware};
use std::sync::Arc;

/// Builds the application router. Every path that is not an admin or favicon
/// route falls through to the proxy pipeline.
pub fn build_router(state: Arc<ProxyState>) -> Router {
    let protected = Router::new()
        .route("/serverPool", get(admin::list_servers))
        .route("/serverPool/add", post(admin::add_server))
        .route("/serverPool/remove", post(admin::remove_server))
        .route("/admin/signup", post(admin::sign_up))
        .route("/admin/password", post(admin::change_password))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_auth,
        ));

    Router::new()
        .route("/admin/signin", post(admin::sign_in))
        .route("/favicon.ico", any(|| async { StatusCode::NOT_FOUND }))
        .merge(protected)
        .fallback(pipeline::proxy_handler)
        .with_state(state)
}
