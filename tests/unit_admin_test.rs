mod common;

use common::{backend_at, method_path_rules, spawn_origin, spawn_proxy, test_state};
use axum::http::StatusCode;
use serde_json::json;
use std::net::SocketAddr;
use tempfile::TempDir;
use turnpike::core::auth::hash_password_for_provisioning;

fn admin_url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// Writes an admins file with a single `root` account. Must run before the
/// proxy state is built, since the directory is loaded at startup.
fn seed_admins(dir: &TempDir) {
    let hash = hash_password_for_provisioning("hunter2").unwrap();
    let contents = json!({ "admins": [{ "username": "root", "password_hash": hash }] });
    std::fs::write(
        dir.path().join("admins.json"),
        serde_json::to_vec(&contents).unwrap(),
    )
    .unwrap();
}

/// Signs `root` in over HTTP and returns the bearer token.
async fn sign_in(client: &reqwest::Client, proxy: SocketAddr) -> String {
    let response = client
        .post(admin_url(proxy, "/admin/signin"))
        .json(&json!({ "username": "root", "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response.json::<serde_json::Value>().await.unwrap()["token"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_server_pool_endpoints_require_a_bearer_token() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, 1 << 20, 0.9, method_path_rules(), vec![]);
    let proxy = spawn_proxy(state).await;
    let client = reqwest::Client::new();

    for path in ["/serverPool", "/serverPool/add", "/serverPool/remove"] {
        let response = client
            .post(admin_url(proxy, path))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            reqwest::StatusCode::UNAUTHORIZED,
            "{path} must be protected"
        );
    }

    let response = client
        .get(admin_url(proxy, "/serverPool"))
        .header("Authorization", "Bearer nonsense")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_add_and_remove_servers() {
    let dir = TempDir::new().unwrap();
    let origin = spawn_origin(StatusCode::OK, "ok", None).await;
    seed_admins(&dir);
    let state = test_state(
        &dir,
        1 << 20,
        0.9,
        method_path_rules(),
        vec![backend_at(origin.addr, true)],
    );
    let proxy = spawn_proxy(state.clone()).await;
    let client = reqwest::Client::new();
    let token = sign_in(&client, proxy).await;

    // List the seeded backend.
    let listed: serde_json::Value = client
        .get(admin_url(proxy, "/serverPool"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["alive"], json!(true));

    // Add a second backend; it is probed immediately.
    let second = spawn_origin(StatusCode::OK, "ok2", None).await;
    let response = client
        .post(admin_url(proxy, "/serverPool/add"))
        .bearer_auth(&token)
        .json(&json!({
            "URL": format!("http://{}", second.addr),
            "HealthCheckTcpTimeout": 1000,
            "MaxRequests": 8,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(state.pool.len(), 2);

    // Adding the same URL again conflicts.
    let response = client
        .post(admin_url(proxy, "/serverPool/add"))
        .bearer_auth(&token)
        .json(&json!({
            "URL": format!("http://{}", second.addr),
            "HealthCheckTcpTimeout": 1000,
            "MaxRequests": 8,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);

    // Remove it.
    let response = client
        .post(admin_url(proxy, "/serverPool/remove"))
        .bearer_auth(&token)
        .json(&json!({ "URL": format!("http://{}", second.addr) }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(state.pool.len(), 1);

    // Removing an unknown backend is a 404.
    let response = client
        .post(admin_url(proxy, "/serverPool/remove"))
        .bearer_auth(&token)
        .json(&json!({ "URL": "http://127.0.0.1:1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_signup_and_password_change_over_http() {
    let dir = TempDir::new().unwrap();
    seed_admins(&dir);
    let state = test_state(&dir, 1 << 20, 0.9, method_path_rules(), vec![]);
    let proxy = spawn_proxy(state).await;
    let client = reqwest::Client::new();
    let token = sign_in(&client, proxy).await;

    let response = client
        .post(admin_url(proxy, "/admin/signup"))
        .bearer_auth(&token)
        .json(&json!({ "username": "ops", "password": "s3cret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let response = client
        .post(admin_url(proxy, "/admin/password"))
        .bearer_auth(&token)
        .json(&json!({
            "username": "ops",
            "old_password": "s3cret",
            "new_password": "n3xt",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // The new credentials work; the old ones do not.
    let response = client
        .post(admin_url(proxy, "/admin/signin"))
        .json(&json!({ "username": "ops", "password": "n3xt" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let response = client
        .post(admin_url(proxy, "/admin/signin"))
        .json(&json!({ "username": "ops", "password": "s3cret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}
