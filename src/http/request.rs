//! Incoming request snapshot.
//!
//! # Responsibilities
//! - Capture the parts of the client request the ESI core reads
//!   (query string, headers, cookies, request ID)
//! - Decode single query parameters and cookies on demand
//!
//! # Design Decisions
//! - Immutable and shared by `Arc` across one render and its nested includes
//! - Body is not retained; only the page fetch forwards it

use axum::http::{HeaderMap, HeaderValue, Method, Uri, request::Parts};
use url::form_urlencoded;

/// Header carrying the correlation ID through the gateway.
pub const X_REQUEST_ID: &str = "x-request-id";

/// The client request a page render is performed for.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl IncomingRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self { method, uri, headers }
    }

    /// Snapshot of an axum request head.
    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone())
    }

    /// A GET request for `uri` with no headers. Invalid URIs become `/`.
    pub fn get(uri: &str) -> Self {
        let uri = uri.parse().unwrap_or_else(|_| Uri::from_static("/"));
        Self::new(Method::GET, uri, HeaderMap::new())
    }

    /// Add a header, ignoring invalid values.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Path plus query, as forwarded to the origin.
    pub fn path_and_query(&self) -> &str {
        self.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    }

    /// Raw query string, empty when absent.
    pub fn query_string(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// Decoded value of the first query parameter called `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        form_urlencoded::parse(self.query_string().as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Header value as text; non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a single cookie from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header("cookie")?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Whether `Accept-Language` lists `lang` (prefix match, so `en` accepts
    /// `en-GB`).
    pub fn accepts_language(&self, lang: &str) -> bool {
        let Some(header) = self.header("accept-language") else {
            return false;
        };
        header
            .split(',')
            .filter_map(|item| item.split(';').next())
            .map(str::trim)
            .any(|tag| {
                tag.eq_ignore_ascii_case(lang)
                    || tag
                        .get(..lang.len())
                        .is_some_and(|p| p.eq_ignore_ascii_case(lang) && tag[lang.len()..].starts_with('-'))
            })
    }

    /// Correlation ID set by the request-id middleware.
    pub fn request_id(&self) -> Option<&str> {
        self.header(X_REQUEST_ID)
    }
}
