//! HTTP response cache honoring Cache-Control.
//!
//! Stores whole backend responses keyed by method and URL. Responses that
//! carry `Vary` are matched only against requests with the same values for
//! the listed headers. One variant per URL is kept.
//!
//! Freshness comes from `s-maxage` or `max-age`; responses without either
//! are not stored (no heuristic freshness, no revalidation). Answers to
//! requests carrying `Authorization` are only stored when the response
//! explicitly allows a shared cache to reuse them.

use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, Method, StatusCode};
use dashmap::DashMap;

use crate::fetch::types::{FetchRequest, FetchResponse};

/// Parsed `Cache-Control` directives relevant to a shared cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
}

impl CacheControl {
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut cc = CacheControl::default();
        for value in headers.get_all(header::CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for directive in value.split(',') {
                let directive = directive.trim();
                let (name, arg) = match directive.split_once('=') {
                    Some((n, a)) => (n.trim(), Some(a.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                match name.to_ascii_lowercase().as_str() {
                    "no-store" => cc.no_store = true,
                    "no-cache" => cc.no_cache = true,
                    "private" => cc.private = true,
                    "public" => cc.public = true,
                    "must-revalidate" => cc.must_revalidate = true,
                    "max-age" => cc.max_age = arg.and_then(|a| a.parse().ok()),
                    "s-maxage" => cc.s_maxage = arg.and_then(|a| a.parse().ok()),
                    _ => {}
                }
            }
        }
        cc
    }

    /// Lifetime a shared cache may serve the response for.
    pub fn shared_max_age(&self) -> Option<Duration> {
        self.s_maxage.or(self.max_age).map(Duration::from_secs)
    }

    /// Whether a response to an authorized request may be shared.
    pub fn allows_authorized(&self) -> bool {
        self.public || self.must_revalidate || self.s_maxage.is_some()
    }
}

#[derive(Debug, Clone)]
struct StoredResponse {
    response: FetchResponse,
    vary: Vec<(String, Option<String>)>,
    expires_at: Instant,
}

impl StoredResponse {
    fn matches(&self, request: &HeaderMap) -> bool {
        self.vary.iter().all(|(name, value)| {
            request.get(name.as_str()).and_then(|v| v.to_str().ok()) == value.as_deref()
        })
    }
}

/// Outcome of a cache lookup, for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Miss,
    Bypass,
}

/// Shared store of cacheable backend responses.
#[derive(Debug)]
pub struct HttpResponseCache {
    entries: DashMap<String, StoredResponse>,
    max_entries: usize,
}

impl HttpResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    fn key(request: &FetchRequest) -> String {
        format!("{} {}", request.method, request.url)
    }

    fn is_cacheable_method(method: &Method) -> bool {
        method == Method::GET || method == Method::HEAD
    }

    fn is_cacheable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 200 | 203 | 300 | 301 | 404 | 410)
    }

    /// Whether the request forbids answering from cache.
    fn request_bypasses(request: &FetchRequest) -> bool {
        let cc = CacheControl::parse(&request.headers);
        let pragma_no_cache = request
            .headers
            .get(header::PRAGMA)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("no-cache"));
        cc.no_cache || cc.no_store || pragma_no_cache
    }

    /// Find a fresh response for `request`. Expired entries are dropped.
    pub fn lookup(&self, request: &FetchRequest) -> (Lookup, Option<FetchResponse>) {
        if !Self::is_cacheable_method(&request.method) || Self::request_bypasses(request) {
            return (Lookup::Bypass, None);
        }
        let key = Self::key(request);
        let now = Instant::now();

        let found = self.entries.get(&key).map(|stored| {
            (stored.expires_at > now, stored.matches(&request.headers), stored.response.clone())
        });

        match found {
            Some((true, true, response)) => (Lookup::Hit, Some(response)),
            Some((false, _, _)) => {
                self.entries.remove_if(&key, |_, stored| stored.expires_at <= now);
                (Lookup::Miss, None)
            }
            _ => (Lookup::Miss, None),
        }
    }

    /// Store `response` if its headers allow it. Returns whether it was kept.
    pub fn store(&self, request: &FetchRequest, response: &FetchResponse) -> bool {
        if !Self::is_cacheable_method(&request.method) || !Self::is_cacheable_status(response.status) {
            return false;
        }
        if CacheControl::parse(&request.headers).no_store {
            return false;
        }
        let cc = CacheControl::parse(&response.headers);
        if cc.no_store || cc.no_cache || cc.private {
            return false;
        }
        if request.headers.contains_key(header::AUTHORIZATION) && !cc.allows_authorized() {
            return false;
        }
        let Some(ttl) = cc.shared_max_age().filter(|ttl| !ttl.is_zero()) else {
            return false;
        };

        let mut vary = Vec::new();
        for value in response.headers.get_all(header::VARY) {
            let Ok(value) = value.to_str() else { return false };
            for name in value.split(',').map(|n| n.trim().to_ascii_lowercase()) {
                if name == "*" {
                    return false;
                }
                if name.is_empty() {
                    continue;
                }
                let current = request
                    .headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                vary.push((name, current));
            }
        }

        let key = Self::key(request);
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            let now = Instant::now();
            self.entries.retain(|_, stored| stored.expires_at > now);
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            tracing::debug!(url = %request.url, max_entries = self.max_entries, "HTTP cache full, not storing");
            return false;
        }

        self.entries.insert(
            key,
            StoredResponse {
                response: response.clone(),
                vary,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
