//! ESI processing subsystem.
//!
//! # Data Flow
//! ```text
//! page body
//!     → scanner.rs (text and esi: tags)
//!     → context.rs (element stack, foreign regions, error claiming)
//!         → element.rs (dispatch by directive)
//!             → include.rs (template.rs → fragment cache → fetch pipeline)
//!             → fragment.rs, inline.rs, conditional.rs, try_block.rs
//!     → renderer.rs (recursion, redirects, extraction)
//!     → composed output
//! ```
//!
//! `aggregator.rs` owns the shared services and creates one `Renderer` per
//! client request.

pub mod aggregator;
pub mod conditional;
pub mod context;
pub mod element;
pub mod error;
pub mod expression;
pub mod fragment;
pub mod include;
pub mod inline;
pub mod renderer;
pub mod scanner;
pub mod template;
pub mod try_block;

pub use aggregator::Aggregator;
pub use error::EsiError;
pub use renderer::{RenderSettings, Renderer};
