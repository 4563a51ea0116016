//! Drives the scanner through a `ParserContext` and returns composed output.
//!
//! # Responsibilities
//! - Render a page or fragment, recursively through includes
//! - Extract one named fragment from a document
//! - Resolve include URLs and fetch them, following redirects
//!
//! # Design Decisions
//! - A `Renderer` is a cheap handle: shared services behind `Arc`, plus the
//!   per-request state (client request, backend snapshot, base URL, depth)
//! - Rendering returns a boxed future so includes can recurse
//! - Depth is bounded; exceeding it is an error rather than a stack overflow

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use futures_util::future::BoxFuture;
use url::Url;

use crate::cache::FragmentCache;
use crate::config::{BackendMap, EsiConfig};
use crate::esi::context::{ParserContext, Root};
use crate::esi::element::{self, Element, TagMatch};
use crate::esi::error::EsiError;
use crate::esi::scanner::{Scanner, Token};
use crate::esi::template::Variables;
use crate::fetch::{FetchContext, FetchPipeline, FetchRequest};
use crate::http::request::{IncomingRequest, X_REQUEST_ID};

/// Render limits and include defaults.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub max_depth: usize,
    pub max_redirects: usize,
    /// Lifetime of fetched documents in the fragment cache; `None` keeps
    /// them until invalidated.
    pub fragment_ttl: Option<Duration>,
    /// Client headers copied onto fragment requests.
    pub forward_headers: Vec<HeaderName>,
}

impl RenderSettings {
    pub fn from_config(config: &EsiConfig) -> Self {
        let forward_headers = config
            .forward_headers
            .iter()
            .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
                Ok(header) => Some(header),
                Err(_) => {
                    tracing::warn!(header = %name, "Ignoring invalid forward header name");
                    None
                }
            })
            .collect();
        Self {
            max_depth: config.max_depth,
            max_redirects: config.max_redirects,
            fragment_ttl: config.fragment_ttl_secs.map(Duration::from_secs),
            forward_headers,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from_config(&EsiConfig::default())
    }
}

/// Services shared by every render.
#[derive(Debug)]
pub struct RenderServices {
    pub cache: Arc<FragmentCache>,
    pub pipeline: Arc<FetchPipeline>,
    pub settings: RenderSettings,
}

#[derive(Clone)]
pub struct Renderer {
    services: Arc<RenderServices>,
    backends: Arc<BackendMap>,
    request: Arc<IncomingRequest>,
    /// URL the content being rendered came from; relative includes are
    /// joined against it.
    base_url: Option<Url>,
    depth: usize,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("depth", &self.depth)
            .finish()
    }
}

impl Renderer {
    pub fn new(
        services: Arc<RenderServices>,
        backends: Arc<BackendMap>,
        request: Arc<IncomingRequest>,
        base_url: Option<Url>,
    ) -> Self {
        Self {
            services,
            backends,
            request,
            base_url,
            depth: 0,
        }
    }

    pub fn cache(&self) -> &FragmentCache {
        &self.services.cache
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.services.settings
    }

    pub fn request(&self) -> &IncomingRequest {
        &self.request
    }

    pub fn variables(&self) -> Variables<'_> {
        Variables::new(&self.backends, &self.request)
    }

    /// Renderer for content fetched from `base_url`, one level deeper.
    pub fn nested(&self, base_url: Url) -> Result<Renderer, EsiError> {
        let depth = self.depth + 1;
        if depth > self.settings().max_depth {
            return Err(EsiError::DepthExceeded(self.settings().max_depth));
        }
        Ok(Renderer {
            base_url: Some(base_url),
            depth,
            ..self.clone()
        })
    }

    /// Compose `input`, executing every directive in it.
    pub fn render<'a>(&'a self, input: &'a str) -> BoxFuture<'a, Result<String, EsiError>> {
        Box::pin(async move {
            let root = self.run(Root::document(), input).await?;
            Ok(root.into_output().unwrap_or_default())
        })
    }

    /// Parse `input` and return the body of `<esi:fragment name="{name}">`.
    pub fn extract_fragment<'a>(
        &'a self,
        input: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<String, EsiError>> {
        Box::pin(async move {
            let root = self.run(Root::extract(name), input).await?;
            root.into_output().ok_or_else(|| EsiError::FragmentNotFound {
                url: self
                    .base_url
                    .as_ref()
                    .map(Url::to_string)
                    .unwrap_or_default(),
                name: name.to_string(),
            })
        })
    }

    async fn run(&self, root: Root, input: &str) -> Result<Root, EsiError> {
        let mut ctx = ParserContext::new(self.clone(), root);
        for token in Scanner::new(input) {
            match token {
                Token::Text(text) => ctx.characters(text),
                Token::Tag(tag) => process_tag(&mut ctx, tag).await?,
            }
        }
        ctx.finish()
    }

    /// Turn a resolved src into an absolute URL.
    pub fn resolve_url(&self, resolved: &str) -> Result<Url, EsiError> {
        match Url::parse(resolved) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .base_url
                    .as_ref()
                    .or_else(|| self.backends.default_url())
                    .ok_or_else(|| EsiError::invalid_url(resolved, "relative URL and no default backend"))?;
                base.join(resolved).map_err(|e| EsiError::invalid_url(resolved, e))
            }
            Err(e) => Err(EsiError::invalid_url(resolved, e)),
        }
    }

    fn fragment_request(&self, url: Url) -> FetchRequest {
        let mut request = FetchRequest::get(url);
        for name in &self.settings().forward_headers {
            if let Some(value) = self.request.headers().get(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(id) = self.request.request_id().and_then(|id| HeaderValue::from_str(id).ok()) {
            request.headers.insert(X_REQUEST_ID, id);
        }
        request
    }

    /// Fetch `url`, following redirects. Returns the final URL and body.
    pub async fn fetch_document(&self, url: Url) -> Result<(Url, String), EsiError> {
        let context = FetchContext::fragment(self.request.request_id().map(str::to_string));
        let max_redirects = self.settings().max_redirects;
        let mut current = url;
        let mut redirects = 0;

        loop {
            let response = self
                .services
                .pipeline
                .fetch(self.fragment_request(current.clone()), &context)
                .await;

            if let Some(location) = response.location() {
                if redirects == max_redirects {
                    return Err(EsiError::TooManyRedirects {
                        url: current.to_string(),
                        max: max_redirects,
                    });
                }
                let next = current
                    .join(location)
                    .map_err(|e| EsiError::invalid_url(location, e))?;
                tracing::debug!(from = %current, to = %next, "Following include redirect");
                current = next;
                redirects += 1;
                continue;
            }

            if !response.is_success() {
                return Err(EsiError::FragmentUnavailable {
                    url: current.to_string(),
                    status: response.status,
                    body: response.body_text(),
                });
            }
            return Ok((current, response.body_text()));
        }
    }
}

/// Dispatch one directive tag.
async fn process_tag(ctx: &mut ParserContext, tag: &str) -> Result<(), EsiError> {
    if ctx.is_foreign() {
        if ctx.foreign_tag(tag) {
            ctx.end_element(tag).await?;
        }
        return Ok(());
    }
    match element::lookup(tag) {
        Some(TagMatch::Start(element_type)) => {
            let closed = ctx.start_element(element_type, Element::new(element_type.kind()), tag)?;
            if closed {
                ctx.end_element(tag).await?;
            }
        }
        Some(TagMatch::End(_)) if ctx.is_current_tag_end(tag) => ctx.end_element(tag).await?,
        Some(TagMatch::End(_)) => {
            // A claimed stray end tag is dropped.
            ctx.report_error(EsiError::Structural(format!("unexpected {}", tag)))?;
        }
        None => {
            tracing::trace!(tag = %tag, "Unknown ESI tag passed through");
            ctx.characters(tag);
        }
    }
    Ok(())
}
