// src/core/metrics.rs

//! Defines and registers Prometheus metrics for proxy monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Pipeline counters ---
    /// The total number of requests received on the proxy path.
    pub static ref REQUESTS_TOTAL: Counter =
        register_counter!("turnpike_requests_total", "Total number of proxied requests.").unwrap();
    /// The total number of responses served from the cache.
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("turnpike_cache_hits_total", "Total number of cache hits.").unwrap();
    /// The total number of requests that had to be forwarded to a backend.
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("turnpike_cache_misses_total", "Total number of cache misses.").unwrap();
    /// Failed forwards, labeled by kind (`transport` or `status`).
    pub static ref BACKEND_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("turnpike_backend_failures_total", "Total number of failed backend forwards, labeled by failure kind.", &["kind"]).unwrap();
    /// Requests that exhausted every backend and were answered with 502.
    pub static ref EXHAUSTED_RETRIES_TOTAL: Counter =
        register_counter!("turnpike_exhausted_retries_total", "Total number of requests that ran out of backends to try.").unwrap();

    // --- Cache counters and gauges ---
    /// The total number of pages written to the store.
    pub static ref CACHE_INSERTS_TOTAL: Counter =
        register_counter!("turnpike_cache_inserts_total", "Total number of pages inserted into the cache.").unwrap();
    /// The total number of pages removed by the evictor.
    pub static ref CACHE_EVICTIONS_TOTAL: Counter =
        register_counter!("turnpike_cache_evictions_total", "Total number of pages evicted from the cache.").unwrap();
    /// The aggregate size of all page files on disk.
    pub static ref CACHE_SIZE_BYTES: Gauge =
        register_gauge!("turnpike_cache_size_bytes", "Aggregate size of cached page files in bytes.").unwrap();

    // --- Pool gauges ---
    /// The number of backends whose most recent probe succeeded.
    pub static ref ALIVE_BACKENDS: Gauge =
        register_gauge!("turnpike_alive_backends", "Number of backends currently considered alive.").unwrap();

    // --- Histograms ---
    /// A histogram of end-to-end request latencies.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("turnpike_request_latency_seconds", "Latency of proxied requests in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
