use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use turnpike::core::auth::{AuthService, hash_password_for_provisioning};

const KEY: &[u8] = b"unit-test-signing-key";

fn seeded_service(dir: &TempDir) -> AuthService {
    let path = dir.path().join("admins.json");
    let hash = hash_password_for_provisioning("hunter2").unwrap();
    let contents = serde_json::json!({
        "admins": [{ "username": "root", "password_hash": hash }]
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&contents).unwrap()).unwrap();
    AuthService::from_file(path.to_str().unwrap(), KEY).unwrap()
}

#[tokio::test]
async fn test_sign_in_issues_a_verifiable_token() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    let token = service.sign_in("root", "hunter2").await.unwrap();
    let claims = service.verify_token(&token).unwrap();
    assert_eq!(claims.username, "root");
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    assert!(claims.exp > now);
}

#[tokio::test]
async fn test_sign_in_rejects_bad_credentials() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    assert!(service.sign_in("root", "wrong").await.is_err());
    assert!(service.sign_in("nobody", "hunter2").await.is_err());
}

#[tokio::test]
async fn test_garbage_tokens_are_rejected() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    assert!(service.verify_token("").is_err());
    assert!(service.verify_token("not.a.jwt").is_err());
}

#[derive(Serialize)]
struct RawClaims {
    username: String,
    exp: u64,
}

#[tokio::test]
async fn test_foreign_signatures_are_rejected() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    let claims = RawClaims {
        username: "root".to_string(),
        exp: (SystemTime::now() + Duration::from_secs(600))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    };
    let forged = jsonwebtoken::encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(b"some-other-key"),
    )
    .unwrap();
    assert!(service.verify_token(&forged).is_err());
}

#[tokio::test]
async fn test_wrong_algorithm_is_rejected() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    let claims = RawClaims {
        username: "root".to_string(),
        exp: (SystemTime::now() + Duration::from_secs(600))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    };
    // Right key, wrong algorithm: the middleware only accepts HS512.
    let hs256 = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(KEY),
    )
    .unwrap();
    assert!(service.verify_token(&hs256).is_err());
}

#[tokio::test]
async fn test_expired_tokens_are_rejected() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    let claims = RawClaims {
        username: "root".to_string(),
        // Far enough in the past to clear the default validation leeway.
        exp: (SystemTime::now() - Duration::from_secs(600))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    };
    let expired = jsonwebtoken::encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(KEY),
    )
    .unwrap();
    assert!(service.verify_token(&expired).is_err());
}

#[tokio::test]
async fn test_add_admin_persists_to_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("admins.json");
    let service = AuthService::from_file(path.to_str().unwrap(), KEY).unwrap();

    service.add_admin("ops", "s3cret").await.unwrap();
    assert!(service.add_admin("ops", "again").await.is_err());

    // A fresh service reads the persisted directory.
    let reloaded = AuthService::from_file(path.to_str().unwrap(), KEY).unwrap();
    assert!(reloaded.sign_in("ops", "s3cret").await.is_ok());
}

#[tokio::test]
async fn test_change_password() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    assert!(service.change_password("root", "wrong", "next").await.is_err());
    service.change_password("root", "hunter2", "next").await.unwrap();

    assert!(service.sign_in("root", "hunter2").await.is_err());
    assert!(service.sign_in("root", "next").await.is_ok());
}

#[tokio::test]
async fn test_missing_admins_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.json");
    let service = AuthService::from_file(path.to_str().unwrap(), KEY).unwrap();
    assert!(service.sign_in("anyone", "anything").await.is_err());
}
