//! ESI fragment aggregation gateway library.

pub mod cache;
pub mod config;
pub mod esi;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use esi::{Aggregator, EsiError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
