// src/core/state.rs

//! Defines the central `ProxyState` struct, holding all shared server-wide
//! state: the cache store, the backend pool, the shared origin client and the
//! admin auth service.

use crate::config::{BackendConfig, CacheRuleConfig, Config};
use crate::core::auth::AuthService;
use crate::core::backend::{Backend, BackendPool};
use crate::core::cache::{CacheStore, MetadataStore, PageStore, RecipeBook};
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;

/// The central struct wrapped in an `Arc` and passed to every request handler
/// and background task.
pub struct ProxyState {
    pub config: Config,
    pub cache: CacheStore,
    pub pool: BackendPool,
    pub http_client: reqwest::Client,
    pub auth: AuthService,
}

impl ProxyState {
    /// Builds the full shared state from validated configuration. Fails fast
    /// on an unopenable store, a bad backend URL, an unknown extractor spec,
    /// or a missing signing key.
    pub fn initialize(
        config: Config,
        backend_configs: &[BackendConfig],
        cache_rules: &[CacheRuleConfig],
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.cache_data_path)
            .with_context(|| format!("Couldn't create directory {}", config.cache_data_path))?;

        let meta = MetadataStore::open(config.database_path())
            .with_context(|| format!("Failed to open metadata store at {}", config.database_path()))?;
        let pages = PageStore::new(config.pages_path());
        let recipes = RecipeBook::from_rules(cache_rules).context("Invalid cache config")?;
        let cache = CacheStore::new(meta, pages, recipes);

        let backends = backend_configs
            .iter()
            .map(|cfg| Backend::from_config(cfg).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid servers config")?;
        let pool = BackendPool::new(backends);

        // The proxy relays redirects to the client verbatim instead of
        // chasing them.
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build origin HTTP client")?;

        let signing_key = std::env::var("JWT_SIGNING_KEY")
            .map_err(|_| anyhow!("JWT signing key is not found"))?;
        let auth = AuthService::from_file(&config.admins_path, signing_key.as_bytes())
            .context("Failed to load admins file")?;

        Ok(Arc::new(Self {
            config,
            cache,
            pool,
            http_client,
            auth,
        }))
    }
}
