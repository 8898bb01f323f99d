// src/core/cache/fingerprint.rs

//! Builds the cache key for a request from a configured recipe of extractors.
//!
//! A fingerprint is the concatenation, in recipe order, of each extractor's
//! output. Extractors are pure functions of the request; a missing field
//! contributes the empty string. Recipes are compiled from configuration at
//! startup and immutable afterwards.

use crate::config::CacheRuleConfig;
use crate::core::errors::ProxyError;
use http::{HeaderMap, Method, Uri};
use std::str::FromStr;

/// A single ingredient of the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extractor {
    Method,
    Host,
    Path,
    RawQuery,
    Header(String),
    QueryParam(String),
}

impl FromStr for Extractor {
    type Err = ProxyError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        match spec {
            "method" => Ok(Extractor::Method),
            "host" => Ok(Extractor::Host),
            "path" => Ok(Extractor::Path),
            "rawQuery" => Ok(Extractor::RawQuery),
            _ => {
                if let Some(name) = spec.strip_prefix("header:") {
                    Ok(Extractor::Header(name.to_string()))
                } else if let Some(name) = spec.strip_prefix("queryParam:") {
                    Ok(Extractor::QueryParam(name.to_string()))
                } else {
                    Err(ProxyError::Config(format!(
                        "Unknown request key extractor '{spec}'"
                    )))
                }
            }
        }
    }
}

impl Extractor {
    /// Applies the extractor to the request. Missing fields yield `""`; header
    /// values are returned verbatim, without normalization.
    fn extract(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> String {
        match self {
            Extractor::Method => method.as_str().to_string(),
            Extractor::Host => uri
                .host()
                .map(str::to_string)
                .or_else(|| {
                    headers
                        .get(http::header::HOST)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                })
                .unwrap_or_default(),
            Extractor::Path => uri.path().to_string(),
            Extractor::RawQuery => uri.query().unwrap_or_default().to_string(),
            Extractor::Header(name) => headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            Extractor::QueryParam(name) => {
                let query = uri.query().unwrap_or_default();
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(k, _)| k == name.as_str())
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default()
            }
        }
    }
}

/// The ordered extractor list configured for one location.
#[derive(Debug, Clone)]
pub struct Recipe {
    location: String,
    extractors: Vec<Extractor>,
}

impl Recipe {
    pub fn new(location: String, extractors: Vec<Extractor>) -> Self {
        Self {
            location,
            extractors,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Concatenates every extractor's output into the fingerprint bytes.
    pub fn fingerprint(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Vec<u8> {
        let mut out = String::new();
        for extractor in &self.extractors {
            out.push_str(&extractor.extract(method, uri, headers));
        }
        out.into_bytes()
    }
}

/// All configured recipes, selected per request by location prefix.
#[derive(Debug, Clone, Default)]
pub struct RecipeBook {
    recipes: Vec<Recipe>,
}

impl RecipeBook {
    /// Compiles the raw cache rules into recipes, rejecting unknown extractor
    /// specs.
    pub fn from_rules(rules: &[CacheRuleConfig]) -> Result<Self, ProxyError> {
        let mut recipes = Vec::with_capacity(rules.len());
        for rule in rules {
            let extractors = rule
                .request_key
                .iter()
                .map(|spec| spec.parse())
                .collect::<Result<Vec<_>, _>>()?;
            recipes.push(Recipe::new(rule.location.clone(), extractors));
        }
        Ok(Self { recipes })
    }

    /// Selects the recipe whose location is the longest prefix of `path`.
    /// Requests matching no location are not cacheable.
    pub fn recipe_for(&self, path: &str) -> Option<&Recipe> {
        self.recipes
            .iter()
            .filter(|r| path.starts_with(r.location()))
            .max_by_key(|r| r.location().len())
    }
}
