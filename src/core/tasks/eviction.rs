// src/core/tasks/eviction.rs

//! A background task that keeps the aggregate page-store size under the
//! configured cap and reconciles the two store tiers.

use crate::core::cache::PageHash;
use crate::core::errors::ProxyError;
use crate::core::metrics;
use crate::core::state::ProxyState;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// One page considered for eviction.
struct Candidate {
    hash: PageHash,
    file_size: i64,
    body_size: i64,
    expired: bool,
    mtime: SystemTime,
}

/// The evictor. Each tick it walks the page tree, removes orphans on either
/// tier, and, when over the cap, deletes pages until the low-water mark
/// (`fill_factor * max_cache_size`) is reached.
pub struct EvictionTask {
    state: Arc<ProxyState>,
}

impl EvictionTask {
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }

    /// The main run loop for the evictor.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Evictor started (tick {:?}, cap {} bytes, fill factor {}).",
            self.state.config.observe_frequency,
            self.state.config.max_cache_size,
            self.state.config.fill_factor,
        );
        let mut interval = tokio::time::interval(self.state.config.observe_frequency);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.observe().await {
                        warn!("Eviction cycle failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Evictor shutting down.");
                    return;
                }
            }
        }
    }

    /// Runs one reconciliation-and-eviction cycle.
    pub async fn observe(&self) -> Result<(), ProxyError> {
        self.observe_at(SystemTime::now()).await
    }

    /// `observe` with an explicit clock, for deterministic expiry tests.
    pub async fn observe_at(&self, now: SystemTime) -> Result<(), ProxyError> {
        let cache = &self.state.cache;
        let files = cache.pages().walk().await?;

        // Reconciliation: a page without readable metadata, or a leaf file
        // that is not a well-formed hash, is corrupt and goes immediately.
        let mut candidates = Vec::new();
        for file in files {
            let Some(hash) = PageHash::from_hex(&file.hash) else {
                warn!(name = %file.hash, "removing foreign file from page store");
                let _ = tokio::fs::remove_file(&file.path).await;
                continue;
            };
            match cache.read_metadata(&hash) {
                Ok(metadata) => candidates.push(Candidate {
                    expired: metadata.response_directives.is_expired(now),
                    body_size: metadata.size,
                    file_size: file.size as i64,
                    mtime: file.mtime,
                    hash,
                }),
                Err(_) => {
                    warn!(hash = %hash, "removing page without metadata");
                    cache.remove_entry(&hash, file.size as i64).await?;
                }
            }
        }

        // The reverse direction: metadata whose page file is gone.
        let on_disk: HashSet<&str> = candidates.iter().map(|c| c.hash.as_str()).collect();
        for hash in cache.meta().list_hashes()? {
            if !on_disk.contains(hash.as_str()) {
                warn!(hash = %hash, "removing metadata without page");
                cache.meta().delete_metadata(&hash)?;
            }
        }

        // The walk is the ground truth for the size counter.
        let total: i64 = candidates.iter().map(|c| c.file_size).sum();
        cache.set_size(total);

        let cap = self.state.config.max_cache_size;
        if cache.current_size() <= cap {
            return Ok(());
        }
        let low_water = (cap as f64 * self.state.config.fill_factor) as i64;

        // Expired entries go first; among fresh entries the largest body
        // first; ties fall to the oldest file.
        candidates.sort_by(|a, b| {
            b.expired
                .cmp(&a.expired)
                .then_with(|| {
                    if a.expired && b.expired {
                        a.mtime.cmp(&b.mtime)
                    } else {
                        b.body_size.cmp(&a.body_size)
                    }
                })
                .then_with(|| a.mtime.cmp(&b.mtime))
        });

        let mut evicted = 0usize;
        for candidate in candidates {
            if cache.current_size() <= low_water {
                break;
            }
            cache.remove_entry(&candidate.hash, candidate.file_size).await?;
            metrics::CACHE_EVICTIONS_TOTAL.inc();
            evicted += 1;
        }

        info!(
            evicted,
            size = cache.current_size(),
            "eviction pass finished"
        );
        Ok(())
    }
}
