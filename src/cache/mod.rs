//! Shared caches.
//!
//! # Data Flow
//! ```text
//! <esi:include> / <esi:inline>
//!     → fragment.rs (resolved src or inline name → body, expiration, fetchable)
//!
//! FetchPipeline
//!     → http.rs (method + URL + Vary → whole backend response, Cache-Control)
//! ```
//!
//! These are the only structures shared across concurrent renders.

pub mod fragment;
pub mod http;

pub use fragment::{FragmentCache, FragmentKey};
pub use http::HttpResponseCache;
