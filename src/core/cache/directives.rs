// src/core/cache/directives.rs

//! Parses request and response `Cache-Control` directives.
//!
//! Tokens are split on `;` and matched by substring for the parameterized
//! forms. Both behaviors mirror the wire format this proxy has historically
//! accepted and must be kept for round-trip fidelity with existing clients.

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Directives carried by a request. Parsed per-request, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestDirectives {
    /// Absolute freshness deadline demanded by the client. `None` = no demand.
    pub max_age: Option<SystemTime>,
    /// Seconds of staleness the client is willing to accept. `0` = strict.
    pub max_stale: u64,
    /// The entry must still be fresh at this instant. `None` = no demand.
    pub min_fresh: Option<SystemTime>,
    pub no_cache: bool,
    pub no_store: bool,
    pub no_transform: bool,
    pub only_if_cached: bool,
}

/// Directives carried by a response, persisted in page metadata at insertion
/// time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDirectives {
    pub must_revalidate: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub no_transform: bool,
    pub private: bool,
    pub proxy_revalidate: bool,
    /// Absolute expiry deadline, anchored to insertion time. `None` = never
    /// expires.
    pub max_age: Option<SystemTime>,
    /// Shared-cache expiry deadline. `None` = unset.
    pub s_maxage: Option<SystemTime>,
}

impl ResponseDirectives {
    /// Whether the entry is past its freshness deadline at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.max_age {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    /// How many whole seconds past the deadline `now` is. `0` while fresh.
    pub fn staleness_secs(&self, now: SystemTime) -> u64 {
        match self.max_age {
            Some(deadline) => now
                .duration_since(deadline)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            None => 0,
        }
    }
}

/// Extracts the number of seconds from a parameterized token such as
/// `max-age=60`. An absent `=` or an unparseable value yields `None`.
fn parse_seconds(token: &str) -> Option<u64> {
    let (_, value) = token.split_once('=')?;
    value.trim().parse::<u64>().ok()
}

/// Joins every `Cache-Control` value of the header map into the single
/// `;`-separated string the tokenizer operates on.
fn cache_control_value(headers: &HeaderMap) -> String {
    headers
        .get_all(http::header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(";")
}

/// Parses the request-side directives out of `headers` at `now`.
pub fn load_request_directives(headers: &HeaderMap, now: SystemTime) -> RequestDirectives {
    let mut result = RequestDirectives::default();

    for token in cache_control_value(headers).split(';') {
        let token = token.trim();
        if token == "only-if-cached" {
            result.only_if_cached = true;
        } else if token == "no-cache" {
            result.no_cache = true;
        } else if token == "no-store" {
            result.no_store = true;
        } else if token == "no-transform" {
            result.no_transform = true;
        } else if token.contains("max-age") {
            if let Some(secs) = parse_seconds(token) {
                result.max_age = Some(now + Duration::from_secs(secs));
            }
        } else if token.contains("max-stale") {
            if let Some(secs) = parse_seconds(token) {
                result.max_stale = secs;
            }
        } else if token.contains("min-fresh") {
            if let Some(secs) = parse_seconds(token) {
                result.min_fresh = Some(now + Duration::from_secs(secs));
            }
        }
    }

    result
}

/// Parses the response-side directives out of `headers` at `now`. Freshness
/// deadlines are anchored to `now`, i.e. to insertion time.
pub fn load_response_directives(headers: &HeaderMap, now: SystemTime) -> ResponseDirectives {
    let mut result = ResponseDirectives::default();

    for token in cache_control_value(headers).split(';') {
        let token = token.trim();
        if token == "must-revalidate" {
            result.must_revalidate = true;
        } else if token == "no-cache" {
            result.no_cache = true;
        } else if token == "no-store" {
            result.no_store = true;
        } else if token == "no-transform" {
            result.no_transform = true;
        } else if token == "private" {
            result.private = true;
        } else if token == "proxy-revalidate" {
            result.proxy_revalidate = true;
        } else if token.contains("s-maxage") {
            if let Some(secs) = parse_seconds(token) {
                result.s_maxage = Some(now + Duration::from_secs(secs));
            }
        } else if token.contains("max-age") {
            if let Some(secs) = parse_seconds(token) {
                result.max_age = Some(now + Duration::from_secs(secs));
            }
        }
    }

    result
}
