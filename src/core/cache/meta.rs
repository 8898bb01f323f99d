// src/core/cache/meta.rs

//! The embedded metadata store: one sled tree per fingerprint hash, holding
//! the page record under the reserved `pageInfo` key.

use crate::core::cache::directives::ResponseDirectives;
use crate::core::errors::ProxyError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The reserved key the page record lives under inside its tree.
pub const PAGE_INFO_KEY: &[u8] = b"pageInfo";

/// The record stored per cached page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageMetadata {
    /// Body length in bytes.
    pub size: i64,
    /// Response directives parsed at insertion time.
    pub response_directives: ResponseDirectives,
}

/// A thin, transactional wrapper around the sled database. Trees are keyed by
/// the full hex hash; writers never starve readers, and a crash mid-write
/// leaves the database in a pre- or post-transaction state.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    db: sled::Db,
}

impl MetadataStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Ensures the tree for `hash` exists and writes `bytes` under `pageInfo`.
    pub fn put_metadata(&self, hash: &str, bytes: &[u8]) -> Result<(), ProxyError> {
        let tree = self.db.open_tree(hash)?;
        tree.insert(PAGE_INFO_KEY, bytes)?;
        Ok(())
    }

    /// Fetches the raw record for `hash`, or `ProxyError::Miss`.
    pub fn get_metadata(&self, hash: &str) -> Result<Vec<u8>, ProxyError> {
        let tree = self.db.open_tree(hash)?;
        match tree.get(PAGE_INFO_KEY)? {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(ProxyError::Miss),
        }
    }

    /// Removes the tree for `hash` and everything in it.
    pub fn delete_metadata(&self, hash: &str) -> Result<(), ProxyError> {
        self.db.drop_tree(hash)?;
        Ok(())
    }

    /// Whether a record exists for `hash`.
    pub fn contains(&self, hash: &str) -> Result<bool, ProxyError> {
        let tree = self.db.open_tree(hash)?;
        Ok(tree.contains_key(PAGE_INFO_KEY)?)
    }

    /// Every hash that currently has a record. Used by the evictor to find
    /// metadata orphans.
    pub fn list_hashes(&self) -> Result<Vec<String>, ProxyError> {
        let mut hashes = Vec::new();
        for name in self.db.tree_names() {
            if name.as_ref() == b"__sled__default" {
                continue;
            }
            let Ok(hash) = std::str::from_utf8(&name) else {
                continue;
            };
            let tree = self.db.open_tree(&name)?;
            if tree.contains_key(PAGE_INFO_KEY)? {
                hashes.push(hash.to_string());
            }
        }
        Ok(hashes)
    }

    /// Flushes buffered writes to disk. Called on graceful shutdown.
    pub fn flush(&self) -> Result<(), ProxyError> {
        self.db.flush()?;
        Ok(())
    }
}
