//! HTTP front end.
//!
//! # Data Flow
//! ```text
//! client request
//!     → server.rs (request ID, tracing, timeout)
//!     → request.rs (snapshot for variable expansion)
//!     → fetch pipeline (page from the default backend)
//!     → aggregator (compose when the page is parseable)
//!     → response.rs (copy origin headers, recompute framing)
//!     → client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{IncomingRequest, X_REQUEST_ID};
pub use server::HttpServer;
