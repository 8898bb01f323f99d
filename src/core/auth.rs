// src/core/auth.rs

//! Admin authentication: HS512 bearer tokens over `{username, exp}` claims,
//! backed by a file of argon2-hashed admin credentials.

use crate::core::errors::ProxyError;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::warn;

/// How long an issued token stays valid.
const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// The claims carried by an admin bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub exp: u64,
}

/// One admin account on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub username: String,
    /// The Argon2 password hash.
    pub password_hash: String,
}

/// The on-disk shape of the admins file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct AdminsFile {
    admins: Vec<AdminUser>,
}

/// Issues and validates admin tokens; the rest of the server only ever asks
/// it for a yes/no authentication decision.
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    admins_path: String,
    admins: Mutex<Vec<AdminUser>>,
}

impl AuthService {
    /// Loads the admin directory from `path`. A missing file is tolerated so
    /// a fresh deployment can start; signin will fail until admins exist.
    pub fn from_file(path: &str, signing_key: &[u8]) -> Result<Self, ProxyError> {
        let admins = match std::fs::read_to_string(path) {
            Ok(contents) => {
                let file: AdminsFile = serde_json::from_str(&contents)?;
                file.admins
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Admins file '{}' not found; starting with no admins", path);
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
            admins_path: path.to_string(),
            admins: Mutex::new(admins),
        })
    }

    /// Verifies the credentials and issues a fresh HS512 token.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<String, ProxyError> {
        let admins = self.admins.lock().await;
        let user = admins
            .iter()
            .find(|u| u.username == username)
            .ok_or(ProxyError::Unauthorized)?;

        let parsed_hash =
            PasswordHash::new(&user.password_hash).map_err(|_| ProxyError::Unauthorized)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| ProxyError::Unauthorized)?;

        let exp = (SystemTime::now() + TOKEN_TTL)
            .duration_since(UNIX_EPOCH)
            .map_err(|_| ProxyError::Unauthorized)?
            .as_secs();
        let claims = Claims {
            username: username.to_string(),
            exp,
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS512),
            &claims,
            &self.encoding_key,
        )
        .map_err(|_| ProxyError::Unauthorized)
    }

    /// Validates a bearer token's HS512 signature and expiry.
    pub fn verify_token(&self, token: &str) -> Result<Claims, ProxyError> {
        let validation = Validation::new(Algorithm::HS512);
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ProxyError::Unauthorized)
    }

    /// Adds a new admin and persists the directory.
    pub async fn add_admin(&self, username: &str, password: &str) -> Result<(), ProxyError> {
        let mut admins = self.admins.lock().await;
        if admins.iter().any(|u| u.username == username) {
            return Err(ProxyError::InvalidRequest(format!(
                "admin '{username}' already exists"
            )));
        }
        let password_hash = hash_password(password)?;
        admins.push(AdminUser {
            username: username.to_string(),
            password_hash,
        });
        self.persist(&admins)
    }

    /// Replaces an admin's password after verifying the old one.
    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ProxyError> {
        let mut admins = self.admins.lock().await;
        let user = admins
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or(ProxyError::Unauthorized)?;

        let parsed_hash =
            PasswordHash::new(&user.password_hash).map_err(|_| ProxyError::Unauthorized)?;
        Argon2::default()
            .verify_password(old_password.as_bytes(), &parsed_hash)
            .map_err(|_| ProxyError::Unauthorized)?;

        user.password_hash = hash_password(new_password)?;
        self.persist(&admins)
    }

    fn persist(&self, admins: &[AdminUser]) -> Result<(), ProxyError> {
        let file = AdminsFile {
            admins: admins.to_vec(),
        };
        let contents = serde_json::to_vec_pretty(&file)?;
        std::fs::write(&self.admins_path, contents)?;
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String, ProxyError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| ProxyError::InvalidRequest("password hashing failed".to_string()))
}

/// Hashes a password for seeding an admins file out-of-band (used by tests
/// and provisioning tooling).
pub fn hash_password_for_provisioning(password: &str) -> Result<String, ProxyError> {
    hash_password(password)
}
