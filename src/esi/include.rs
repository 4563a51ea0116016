//! `<esi:include>`: fetch, cache and compose a fragment.
//!
//! # Lookup order
//! ```text
//! resolve src (variables, then URL join)
//!     → fragment cache: exact (src, fragment) entry
//!     → fragment cache: whole document for src
//!     → per-key lock, re-check, fetch through the pipeline (redirects
//!       followed), store the document
//!     → extract `fragment` if requested, render nested directives
//! ```
//!
//! On failure the `alt` source is tried, then `onerror="continue"` drops the
//! include silently, else the error is reported to enclosing elements.

use std::time::{Duration, SystemTime};

use crate::cache::FragmentKey;
use crate::esi::context::ParserContext;
use crate::esi::error::EsiError;
use crate::esi::renderer::Renderer;
use crate::esi::scanner;
use crate::observability::metrics;

#[derive(Debug, Default)]
pub struct IncludeElement {
    src: String,
    fragment: Option<String>,
    alt: Option<String>,
    continue_on_error: bool,
    ttl: Option<Duration>,
}

impl IncludeElement {
    /// Stand-in used by the root of an extraction pass.
    pub fn extraction(fragment: &str) -> Self {
        Self {
            fragment: Some(fragment.to_string()),
            ..Self::default()
        }
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn on_tag_start(&mut self, tag: &str) -> Result<(), EsiError> {
        let mut attributes = scanner::parse_attributes(tag);
        self.src = attributes.remove("src").ok_or(EsiError::MissingAttribute {
            element: "include",
            attribute: "src",
        })?;
        self.fragment = attributes.remove("fragment").filter(|f| !f.is_empty());
        self.alt = attributes.remove("alt").filter(|a| !a.is_empty());
        self.continue_on_error = attributes
            .get("onerror")
            .is_some_and(|v| v.eq_ignore_ascii_case("continue"));
        self.ttl = match attributes.get("ttl") {
            Some(raw) => {
                let ttl = parse_ttl(raw);
                if ttl.is_none() {
                    tracing::warn!(ttl = %raw, src = %self.src, "Ignoring invalid include ttl");
                }
                ttl
            }
            None => None,
        };
        Ok(())
    }

    pub async fn on_tag_end(self, ctx: &mut ParserContext) -> Result<(), EsiError> {
        let renderer = ctx.renderer().clone();
        let error = match retrieve(&renderer, &self.src, self.fragment.as_deref(), self.ttl).await {
            Ok(content) => {
                ctx.characters(&content);
                return Ok(());
            }
            Err(e) => e,
        };

        if let Some(alt) = &self.alt {
            tracing::debug!(src = %self.src, alt = %alt, error = %error, "Include failed, trying alt");
            match retrieve(&renderer, alt, self.fragment.as_deref(), self.ttl).await {
                Ok(content) => {
                    ctx.characters(&content);
                    return Ok(());
                }
                Err(alt_error) => {
                    tracing::debug!(alt = %alt, error = %alt_error, "Alternate include failed");
                }
            }
        }

        if self.continue_on_error {
            tracing::warn!(src = %self.src, error = %error, "Include failed, continuing");
            return Ok(());
        }
        ctx.report_error(error)
    }
}

/// Parse `N`, `Ns`, `Nm`, `Nh` or `Nd`.
fn parse_ttl(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last()? {
        (i, c) if c.is_ascii_alphabetic() => (&raw[..i], c.to_ascii_lowercase()),
        _ => (raw, 's'),
    };
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        's' => n,
        'm' => n.checked_mul(60)?,
        'h' => n.checked_mul(3_600)?,
        'd' => n.checked_mul(86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Resolve `template` and return the composed content it points to.
pub(crate) async fn retrieve(
    renderer: &Renderer,
    template: &str,
    fragment: Option<&str>,
    ttl: Option<Duration>,
) -> Result<String, EsiError> {
    let resolved = renderer.variables().substitute(template)?;
    let url = renderer.resolve_url(&resolved)?;
    let cache = renderer.cache();

    // The raw document is cached; extraction runs per request.
    let key = FragmentKey::document(url.as_str());
    let (base, document) = match cache.get(&key) {
        Some(content) => {
            metrics::record_fragment_cache(true);
            (url, content.to_string())
        }
        None => {
            metrics::record_fragment_cache(false);
            let _lock = cache.lock(&key).await;
            match cache.get(&key) {
                Some(content) => (url, content.to_string()),
                None => {
                    let (final_url, body) = renderer.fetch_document(url).await?;
                    let expires_at = ttl
                        .or(renderer.settings().fragment_ttl)
                        .map(|ttl| SystemTime::now() + ttl);
                    cache.store_fetched(key.clone(), body.as_str(), expires_at);
                    (final_url, body)
                }
            }
        }
    };

    let nested = renderer.nested(base)?;
    match fragment {
        Some(name) => nested.extract_fragment(&document, name).await,
        None => nested.render(&document).await,
    }
}
