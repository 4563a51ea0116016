//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → BackendMap built from `backends`, shared via Arc
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps the BackendMap atomically
//!     → renders started afterwards see the new providers
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod backends;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use backends::BackendMap;
pub use schema::GatewayConfig;
pub use schema::BackendConfig;
pub use schema::EsiConfig;
