//! HTTP server setup and the page handler.
//!
//! # Responsibilities
//! - Create the Axum router (status endpoint, catch-all page handler)
//! - Wire up middleware (request ID, tracing, timeout)
//! - Reject request bodies over `listener.max_body_size`
//! - Proxy each client request to the default backend
//! - Compose parseable 2xx pages through the aggregator
//! - Apply backend map reloads while running
//! - Record page metrics

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    response::{Json, Response},
    routing::{any, get},
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use url::Url;

use crate::config::{BackendMap, GatewayConfig};
use crate::esi::Aggregator;
use crate::fetch::{EventKind, FetchContext, FetchRequest, Transport, TransportError};
use crate::http::request::IncomingRequest;
use crate::http::response::{client_response, error_page, forwardable_request_headers, text_response};
use crate::observability::metrics::{self, PageOutcome};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub max_body_size: usize,
}

/// HTTP front end of the gateway.
pub struct HttpServer {
    router: Router,
    aggregator: Aggregator,
}

impl HttpServer {
    /// Create a server using the real outbound transport.
    pub fn new(config: GatewayConfig) -> Result<Self, TransportError> {
        let aggregator = Aggregator::from_config(&config)?;
        Ok(Self::with_aggregator(&config, aggregator))
    }

    /// Create a server around a transport, e.g. an in-memory one in tests.
    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        let aggregator = Aggregator::with_transport(&config, transport);
        Self::with_aggregator(&config, aggregator)
    }

    pub fn with_aggregator(config: &GatewayConfig, aggregator: Aggregator) -> Self {
        let state = AppState {
            aggregator: aggregator.clone(),
            max_body_size: config.listener.max_body_size,
        };
        let router = Self::build_router(config, state);
        Self { router, aggregator }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/_esi/status", get(status_handler))
            .route("/", any(page_handler))
            .route("/{*path}", any(page_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Serve until `shutdown` fires. Configurations received on
    /// `config_updates` replace the backend map.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let aggregator = self.aggregator.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                aggregator.reload_backends(BackendMap::from_config(&config));
            }
        });

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Gateway status as JSON.
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let aggregator = &state.aggregator;
    Json(json!({
        "service": "esi-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": aggregator.backends().len(),
        "fragment_cache_entries": aggregator.cache().len(),
        "http_cache_entries": aggregator.http_cache().map(|c| c.len()),
        "connections_in_flight": aggregator.in_flight(),
        "listeners": {
            "fetch_pre": aggregator.events().listener_count(EventKind::FetchPre),
            "fetch_post": aggregator.events().listener_count(EventKind::FetchPost),
        },
    }))
}

/// Proxy the request to the default backend and compose the answer.
async fn page_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let incoming = IncomingRequest::from_parts(&parts);
    let request_id = incoming
        .request_id()
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        "Serving page"
    );

    let backends = state.aggregator.backends();
    let Some(page_url) = page_url(&backends, &incoming) else {
        tracing::warn!(request_id = %request_id, "No default backend configured");
        metrics::record_page(PageOutcome::Failed, 502, start);
        return text_response(StatusCode::BAD_GATEWAY, "No default backend configured");
    };

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            metrics::record_page(PageOutcome::Failed, 413, start);
            return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };

    let mut fetch = FetchRequest::new(parts.method.clone(), page_url.clone()).with_body(body);
    fetch.headers = forwardable_request_headers(&parts.headers);

    let context = FetchContext::proxy(Some(request_id.clone()));
    let origin = state.aggregator.pipeline().fetch(fetch, &context).await;

    let parseable = origin.is_success()
        && parts.method != Method::HEAD
        && state.aggregator.is_parseable(origin.content_type());
    if !parseable {
        metrics::record_page(PageOutcome::Passthrough, origin.status.as_u16(), start);
        return client_response(origin.status, &origin.headers, origin.body);
    }

    let renderer = state.aggregator.renderer(incoming, Some(page_url));
    match renderer.render(&origin.body_text()).await {
        Ok(composed) => {
            tracing::debug!(
                request_id = %request_id,
                status = %origin.status,
                bytes = composed.len(),
                "Page composed"
            );
            metrics::record_page(PageOutcome::Rendered, origin.status.as_u16(), start);
            client_response(origin.status, &origin.headers, composed)
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Page composition failed");
            metrics::record_page(PageOutcome::Failed, e.status().as_u16(), start);
            error_page(&e)
        }
    }
}

/// Origin URL for the client request on the default backend.
fn page_url(backends: &BackendMap, incoming: &IncomingRequest) -> Option<Url> {
    let base = backends.default_url()?;
    base.join(incoming.path_and_query()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_uses_default_backend() {
        let backends = BackendMap::from_pairs([("origin", "http://origin.local:3000/")])
            .unwrap()
            .with_default("origin");
        let url = page_url(&backends, &IncomingRequest::get("/shop/cart?id=3")).unwrap();
        assert_eq!(url.as_str(), "http://origin.local:3000/shop/cart?id=3");

        assert!(page_url(&BackendMap::default(), &IncomingRequest::get("/")).is_none());
    }
}
