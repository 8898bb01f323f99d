// src/core/backend/pool.rs

//! The ordered backend set with a round-robin cursor over live members.

use crate::core::backend::Backend;
use crate::core::errors::ProxyError;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct PoolInner {
    backends: Vec<Arc<Backend>>,
    cursor: usize,
}

/// An append/remove-capable list of backends. All reads and mutations hold
/// the same short mutex; the cursor advances by one per successful pick.
#[derive(Debug, Default)]
pub struct BackendPool {
    inner: Mutex<PoolInner>,
}

impl BackendPool {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                backends,
                cursor: 0,
            }),
        }
    }

    /// Starting after the cursor, returns the first live backend, or
    /// `NoLiveBackend` after a full fruitless sweep.
    pub fn pick_next(&self) -> Result<Arc<Backend>, ProxyError> {
        let mut inner = self.inner.lock();
        let count = inner.backends.len();
        if count == 0 {
            return Err(ProxyError::NoLiveBackend);
        }
        for step in 1..=count {
            let index = (inner.cursor + step) % count;
            if inner.backends[index].is_alive() {
                inner.cursor = index;
                return Ok(Arc::clone(&inner.backends[index]));
            }
        }
        Err(ProxyError::NoLiveBackend)
    }

    /// Appends a backend. Duplicate URLs are rejected.
    pub fn add(&self, backend: Arc<Backend>) -> Result<(), ProxyError> {
        let mut inner = self.inner.lock();
        if inner.backends.iter().any(|b| b.url() == backend.url()) {
            return Err(ProxyError::InvalidRequest(format!(
                "backend '{}' is already in the pool",
                backend.url()
            )));
        }
        inner.backends.push(backend);
        Ok(())
    }

    /// Removes the backend with the given URL, clamping the cursor to the new
    /// length. The URL is compared in parsed form so spelling differences
    /// (e.g. a missing trailing slash) still match.
    pub fn remove(&self, url: &str) -> Result<(), ProxyError> {
        let target = url::Url::parse(url).ok();
        let mut inner = self.inner.lock();
        let before = inner.backends.len();
        inner.backends.retain(|b| match &target {
            Some(target) => b.url() != target,
            None => b.url().as_str() != url,
        });
        if inner.backends.len() == before {
            return Err(ProxyError::InvalidRequest(format!(
                "backend '{url}' is not in the pool"
            )));
        }
        let count = inner.backends.len();
        inner.cursor = if count == 0 { 0 } else { inner.cursor % count };
        Ok(())
    }

    /// A point-in-time copy of the backend list, for iteration without
    /// holding the pool lock.
    pub fn snapshot(&self) -> Vec<Arc<Backend>> {
        self.inner.lock().backends.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
