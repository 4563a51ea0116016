//! The ESI service object.
//!
//! Owns everything a render needs and hands out per-request renderers.
//! Built once at startup and cloned into handlers.

use std::sync::Arc;

use arc_swap::ArcSwap;
use url::Url;

use crate::cache::{FragmentCache, HttpResponseCache};
use crate::config::{BackendMap, GatewayConfig};
use crate::esi::error::EsiError;
use crate::esi::renderer::{RenderServices, RenderSettings, Renderer};
use crate::fetch::caching::HttpCacheLayer;
use crate::fetch::{EventBus, EventLayer, FetchPipeline, HttpTransport, Transport, TransportError};
use crate::http::request::IncomingRequest;

struct Shared {
    services: Arc<RenderServices>,
    events: Arc<EventBus>,
    http_cache: Option<Arc<HttpResponseCache>>,
    backends: ArcSwap<BackendMap>,
    parseable_content_types: Vec<String>,
}

#[derive(Clone)]
pub struct Aggregator {
    shared: Arc<Shared>,
}

impl Aggregator {
    /// Build with the real HTTP transport.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build around any transport.
    pub fn with_transport(config: &GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        let events = Arc::new(EventBus::new());
        let mut pipeline = FetchPipeline::new(transport).layer(Arc::new(EventLayer::new(events.clone())));

        let http_cache = config
            .http_cache
            .enabled
            .then(|| Arc::new(HttpResponseCache::new(config.http_cache.max_entries)));
        if let Some(cache) = &http_cache {
            pipeline = pipeline.layer(Arc::new(HttpCacheLayer::new(cache.clone())));
        }

        let services = Arc::new(RenderServices {
            cache: Arc::new(FragmentCache::new()),
            pipeline: Arc::new(pipeline),
            settings: RenderSettings::from_config(&config.esi),
        });

        Self {
            shared: Arc::new(Shared {
                services,
                events,
                http_cache,
                backends: ArcSwap::from_pointee(BackendMap::from_config(config)),
                parseable_content_types: config
                    .esi
                    .parseable_content_types
                    .iter()
                    .map(|t| t.to_ascii_lowercase())
                    .collect(),
            }),
        }
    }

    /// Bus for registering fetch extensions.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    pub fn cache(&self) -> &Arc<FragmentCache> {
        &self.shared.services.cache
    }

    pub fn http_cache(&self) -> Option<&Arc<HttpResponseCache>> {
        self.shared.http_cache.as_ref()
    }

    pub fn pipeline(&self) -> &Arc<FetchPipeline> {
        &self.shared.services.pipeline
    }

    /// Current backend snapshot.
    pub fn backends(&self) -> Arc<BackendMap> {
        self.shared.backends.load_full()
    }

    /// Swap the backend map. Renders already running keep their snapshot.
    pub fn reload_backends(&self, backends: BackendMap) {
        tracing::info!(backends = backends.len(), "Backend map reloaded");
        self.shared.backends.store(Arc::new(backends));
    }

    /// Connection slots currently in use.
    pub fn in_flight(&self) -> usize {
        self.pipeline().transport().in_flight()
    }

    /// Renderer for one client request. `base_url` is the page URL relative
    /// includes are resolved against.
    pub fn renderer(&self, request: IncomingRequest, base_url: Option<Url>) -> Renderer {
        Renderer::new(
            self.shared.services.clone(),
            self.backends(),
            Arc::new(request),
            base_url,
        )
    }

    pub async fn render(
        &self,
        request: IncomingRequest,
        base_url: Option<Url>,
        page: &str,
    ) -> Result<String, EsiError> {
        self.renderer(request, base_url).render(page).await
    }

    /// Whether a response with this content type goes through ESI.
    pub fn is_parseable(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.shared.parseable_content_types.iter().any(|t| *t == mime)
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("fragments", &self.cache().len())
            .field("backends", &self.backends().len())
            .finish()
    }
}
