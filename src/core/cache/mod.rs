// src/core/cache/mod.rs

//! The cache engine: fingerprinting, hashing, the two-tier store, and the
//! lookup/insert policies that tie them together.

pub mod directives;
pub mod fingerprint;
pub mod meta;
pub mod pages;

pub use directives::{RequestDirectives, ResponseDirectives};
pub use fingerprint::{Extractor, Recipe, RecipeBook};
pub use meta::{MetadataStore, PageMetadata};
pub use pages::{PageFile, PageStore};

use crate::core::errors::ProxyError;
use http::{HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;
use tracing::debug;

/// The diagnostic body returned for an unsatisfiable `only-if-cached` request.
pub const ONLY_IF_CACHED_ERROR: &str = "HTTP 504 Unsatisfiable Request (only-if-cached)";

/// Length of the lowercase hex SHA-1 rendering of a fingerprint.
pub const HASH_LENGTH: usize = 40;

/// Number of sub-hashes the hex string is partitioned into.
pub const SUB_HASH_COUNT: usize = 4;

const SHARD_LENGTH: usize = HASH_LENGTH / SUB_HASH_COUNT;

/// The 40-char lowercase hex SHA-1 of a fingerprint. Doubles as the metadata
/// bucket name and the page file name; its 4 shards name the page directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageHash(String);

impl PageHash {
    /// Hashes fingerprint bytes into a page hash.
    pub fn from_fingerprint(fingerprint: &[u8]) -> Self {
        let digest = Sha1::digest(fingerprint);
        PageHash(hex::encode(digest))
    }

    /// Validates an externally supplied hex string (e.g. a file name found by
    /// the evictor walk).
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() == HASH_LENGTH
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            Some(PageHash(hex.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 4 equal-length sub-hashes, in order.
    pub fn shards(&self) -> [&str; SUB_HASH_COUNT] {
        [
            &self.0[..SHARD_LENGTH],
            &self.0[SHARD_LENGTH..2 * SHARD_LENGTH],
            &self.0[2 * SHARD_LENGTH..3 * SHARD_LENGTH],
            &self.0[3 * SHARD_LENGTH..],
        ]
    }
}

impl std::fmt::Display for PageHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The cache unit stored on disk: a response's headers and body, round-tripped
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub header: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl Page {
    /// Captures a response's headers and buffered body.
    pub fn from_parts(headers: &HeaderMap, body: &[u8]) -> Self {
        let mut header: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                header
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
        Page {
            header,
            body: body.to_vec(),
        }
    }

    /// Rebuilds an `http::HeaderMap` from the stored header mapping. Entries
    /// that no longer form valid header names or values are dropped.
    pub fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, values) in &self.header {
            let Ok(name) = http::header::HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in values {
                if let Ok(value) = http::header::HeaderValue::from_str(value) {
                    headers.append(name.clone(), value);
                }
            }
        }
        headers
    }
}

/// Ties the fingerprint builder, the metadata store and the page store into
/// the Lookup/Insert policies, and owns the aggregate page-size counter.
#[derive(Debug)]
pub struct CacheStore {
    meta: MetadataStore,
    pages: PageStore,
    recipes: RecipeBook,
    current_size: AtomicI64,
}

impl CacheStore {
    pub fn new(meta: MetadataStore, pages: PageStore, recipes: RecipeBook) -> Self {
        Self {
            meta,
            pages,
            recipes,
            current_size: AtomicI64::new(0),
        }
    }

    pub fn meta(&self) -> &MetadataStore {
        &self.meta
    }

    pub fn pages(&self) -> &PageStore {
        &self.pages
    }

    /// Aggregate size of page files, as tracked incrementally.
    pub fn current_size(&self) -> i64 {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn add_size(&self, delta: i64) {
        self.current_size.fetch_add(delta, Ordering::Relaxed);
    }

    /// Overwrites the size counter with a freshly walked total.
    pub fn set_size(&self, total: i64) {
        self.current_size.store(total, Ordering::Relaxed);
        crate::core::metrics::CACHE_SIZE_BYTES.set(total as f64);
    }

    /// Walks the page tree and resets the size counter to the sum of file
    /// sizes. Called at startup, before the evictor runs.
    pub async fn recompute_size(&self) -> Result<i64, ProxyError> {
        let total: i64 = self
            .pages
            .walk()
            .await?
            .iter()
            .map(|f| f.size as i64)
            .sum();
        self.set_size(total);
        Ok(total)
    }

    /// Computes the page hash for a request, if any configured location
    /// covers its path.
    pub fn hash_for(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Option<PageHash> {
        let recipe = self.recipes.recipe_for(uri.path())?;
        Some(PageHash::from_fingerprint(&recipe.fingerprint(
            method, uri, headers,
        )))
    }

    /// Looks the request up in the cache.
    pub async fn lookup(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Result<Page, ProxyError> {
        self.lookup_at(method, uri, headers, SystemTime::now()).await
    }

    /// `lookup` with an explicit clock, for deterministic freshness tests.
    pub async fn lookup_at(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        now: SystemTime,
    ) -> Result<Page, ProxyError> {
        let request = directives::load_request_directives(headers, now);

        let metadata = if request.no_store || request.no_cache {
            None
        } else {
            match self.hash_for(method, uri, headers) {
                Some(hash) => self.read_metadata(&hash).ok().map(|m| (hash, m)),
                None => None,
            }
        };

        let Some((hash, metadata)) = metadata else {
            if request.only_if_cached {
                return Err(ProxyError::OnlyIfCachedMiss);
            }
            return Err(ProxyError::Miss);
        };

        let response = &metadata.response_directives;

        if response.is_expired(now) {
            if response.no_store || response.must_revalidate {
                return Err(ProxyError::Stale);
            }
            if response.staleness_secs(now) > request.max_stale {
                return Err(ProxyError::Stale);
            }
        }

        // The client's freshness demands; an unset response deadline never
        // fails them.
        if let (Some(min_fresh), Some(deadline)) = (request.min_fresh, response.max_age) {
            if deadline < min_fresh {
                return Err(ProxyError::Miss);
            }
        }
        if let (Some(demanded), Some(deadline)) = (request.max_age, response.max_age) {
            if demanded > deadline {
                return Err(ProxyError::Miss);
            }
        }

        let bytes = self.pages.read_page(&hash).await?;
        let page: Page = bincode::deserialize(&bytes)?;
        Ok(page)
    }

    /// Inserts a buffered backend response under the request's fingerprint.
    pub async fn insert(
        &self,
        method: &Method,
        uri: &Uri,
        request_headers: &HeaderMap,
        status: u16,
        response_headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), ProxyError> {
        self.insert_at(
            method,
            uri,
            request_headers,
            status,
            response_headers,
            body,
            SystemTime::now(),
        )
        .await
    }

    /// `insert` with an explicit clock, for deterministic freshness tests.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_at(
        &self,
        method: &Method,
        uri: &Uri,
        request_headers: &HeaderMap,
        status: u16,
        response_headers: &HeaderMap,
        body: &[u8],
        now: SystemTime,
    ) -> Result<(), ProxyError> {
        let request = directives::load_request_directives(request_headers, now);
        let response = directives::load_response_directives(response_headers, now);

        if request.no_store || response.no_store {
            return Err(ProxyError::NotStorable);
        }
        if !(200..400).contains(&status) {
            return Err(ProxyError::NotStorable);
        }

        let Some(hash) = self.hash_for(method, uri, request_headers) else {
            return Err(ProxyError::NotStorable);
        };

        let metadata = PageMetadata {
            size: body.len() as i64,
            response_directives: response,
        };
        let metadata_bytes = serde_json::to_vec(&metadata)?;

        let page = Page::from_parts(response_headers, body);
        let page_bytes = bincode::serialize(&page)?;

        // Last-writer-wins overwrites must not inflate the size counter.
        let previous_size = match tokio::fs::metadata(self.pages.page_path(&hash)).await {
            Ok(meta) => meta.len() as i64,
            Err(_) => 0,
        };

        // Metadata first; a page write failure rolls it back so the pairing
        // invariant holds.
        self.meta.put_metadata(hash.as_str(), &metadata_bytes)?;
        if let Err(e) = self.pages.write_page(&hash, &page_bytes).await {
            let _ = self.meta.delete_metadata(hash.as_str());
            return Err(e);
        }

        self.add_size(page_bytes.len() as i64 - previous_size);
        crate::core::metrics::CACHE_SIZE_BYTES.set(self.current_size() as f64);
        crate::core::metrics::CACHE_INSERTS_TOTAL.inc();
        debug!(hash = %hash, size = metadata.size, "stored page in cache");
        Ok(())
    }

    /// Decodes the metadata record for `hash`.
    pub fn read_metadata(&self, hash: &PageHash) -> Result<PageMetadata, ProxyError> {
        let bytes = self.meta.get_metadata(hash.as_str())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Removes a page and its metadata as a pair, adjusting the size counter
    /// by `file_size`.
    pub async fn remove_entry(&self, hash: &PageHash, file_size: i64) -> Result<(), ProxyError> {
        self.meta.delete_metadata(hash.as_str())?;
        self.pages.delete_page(hash).await?;
        self.add_size(-file_size);
        crate::core::metrics::CACHE_SIZE_BYTES.set(self.current_size() as f64);
        Ok(())
    }
}
