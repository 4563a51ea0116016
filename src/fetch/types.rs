//! Request, response and error types shared by the fetch pipeline.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use thiserror::Error;
use url::Url;

/// Body of the response synthesized when an extension exits without
/// providing one.
pub const EXTENSION_ABORT_BODY: &str =
    "An extension stopped the processing of the request without providing a response";

/// An outgoing request to a backend.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

/// A fully buffered backend response.
///
/// The body is read completely before the response leaves the transport,
/// so no pooled connection outlives the value.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Plain-text response, used for synthesized errors.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut response = Self::new(status, body.into());
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// The fixed 500 returned when an extension aborts without a response.
    pub fn extension_abort() -> Self {
        Self::text(StatusCode::INTERNAL_SERVER_ERROR, EXTENSION_ABORT_BODY)
    }

    /// Convert a transport failure into a normal response.
    pub fn from_transport_error(error: &TransportError) -> Self {
        Self::text(error.status(), error.to_string())
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Target of a redirect, if this is one.
    pub fn location(&self) -> Option<&str> {
        if !self.status.is_redirection() {
            return None;
        }
        self.headers.get(header::LOCATION).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Per-fetch context handed to layers and event listeners.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    /// True when the whole client request is being proxied (page fetch),
    /// false for fragment fetches issued by includes.
    pub proxy: bool,

    /// Correlation ID of the client request.
    pub request_id: Option<String>,
}

impl FetchContext {
    pub fn proxy(request_id: Option<String>) -> Self {
        Self { proxy: true, request_id }
    }

    pub fn fragment(request_id: Option<String>) -> Self {
        Self { proxy: false, request_id }
    }
}

/// Transport-level failures. These never escape the pipeline.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish a connection to the backend.
    #[error("Connection to backend failed: {0}")]
    Connect(String),

    /// Connect or response deadline elapsed.
    #[error("Backend request timed out: {0}")]
    Timeout(String),

    /// No pooled connection became free in time.
    #[error("No backend connection available after {0} ms")]
    PoolExhausted(u64),

    /// Any other protocol or I/O failure.
    #[error("Backend request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Status of the response the failure is normalized into.
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::Connect(_) => StatusCode::BAD_GATEWAY,
            TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TransportError::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            TransportError::Request(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}
