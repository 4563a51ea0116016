//! Outbound fetch subsystem.
//!
//! # Data Flow
//! ```text
//! Page proxy / <esi:include>
//!     → pipeline.rs (FetchPipeline::fetch)
//!         → events.rs (FetchPre listeners, may exit)
//!         → caching.rs (HTTP response cache)
//!         → transport.rs (bounded reqwest client)
//!         ← failures normalized to 5xx responses
//!         → events.rs (FetchPost listeners, may replace the response)
//!     → FetchResponse (fully buffered)
//! ```

pub mod caching;
pub mod events;
pub mod pipeline;
pub mod transport;
pub mod types;

pub use events::{EventBus, EventKind, FetchEvent, FetchListener};
pub use pipeline::{EventLayer, FetchLayer, FetchPipeline, Next};
pub use transport::{HttpTransport, Transport};
pub use types::{FetchContext, FetchRequest, FetchResponse, TransportError};
