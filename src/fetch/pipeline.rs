//! Ordered middleware chain around the outbound HTTP call.
//!
//! # Layer order
//! ```text
//! fetch(request, context)
//!     → EventLayer      (FetchPre, exit handling, FetchPost)
//!     → HttpCacheLayer  (optional; may answer without calling further)
//!     → terminal        (Transport::send, failures normalized to 5xx)
//! ```
//!
//! Layers are composed once, when the pipeline is built. Every call returns
//! a `FetchResponse`; transport errors stop at the terminal.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;

use crate::fetch::events::{EventBus, EventKind, FetchEvent};
use crate::fetch::transport::Transport;
use crate::fetch::types::{FetchContext, FetchRequest, FetchResponse};
use crate::observability::metrics;

/// One stage of the pipeline.
pub trait FetchLayer: Send + Sync {
    fn handle<'a>(
        &'a self,
        request: FetchRequest,
        context: &'a FetchContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, FetchResponse>;
}

/// The remainder of the chain after the current layer.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    layers: &'a [Arc<dyn FetchLayer>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub fn new(layers: &'a [Arc<dyn FetchLayer>], transport: &'a dyn Transport) -> Self {
        Self { layers, transport }
    }

    /// Run the rest of the chain.
    pub fn run(self, request: FetchRequest, context: &'a FetchContext) -> BoxFuture<'a, FetchResponse> {
        match self.layers.split_first() {
            Some((layer, rest)) => layer.handle(
                request,
                context,
                Next {
                    layers: rest,
                    transport: self.transport,
                },
            ),
            None => {
                let transport = self.transport;
                Box::pin(async move { send_normalized(transport, request).await })
            }
        }
    }
}

/// Terminal stage: call the transport and turn failures into responses.
async fn send_normalized(transport: &dyn Transport, request: FetchRequest) -> FetchResponse {
    let start = Instant::now();
    match transport.send(&request).await {
        Ok(response) => {
            metrics::record_fetch(response.status.as_u16(), start);
            response
        }
        Err(e) => {
            tracing::warn!(
                method = %request.method,
                url = %request.url,
                error = %e,
                "Backend fetch failed"
            );
            let response = FetchResponse::from_transport_error(&e);
            metrics::record_fetch(response.status.as_u16(), start);
            response
        }
    }
}

/// Fires `FetchPre`/`FetchPost` around the rest of the chain.
pub struct EventLayer {
    bus: Arc<EventBus>,
}

impl EventLayer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl FetchLayer for EventLayer {
    fn handle<'a>(
        &'a self,
        request: FetchRequest,
        context: &'a FetchContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, FetchResponse> {
        Box::pin(async move {
            let mut event = FetchEvent::new(request, context.clone());
            self.bus.fire(EventKind::FetchPre, &mut event);

            let response = if !event.exit {
                next.run(event.request.clone(), context).await
            } else if let Some(response) = event.response.take() {
                tracing::debug!(url = %event.request.url, "Fetch answered by extension");
                response
            } else {
                tracing::warn!(url = %event.request.url, "Extension exited without a response");
                FetchResponse::extension_abort()
            };

            event.response = Some(response);
            self.bus.fire(EventKind::FetchPost, &mut event);
            event.response.take().unwrap_or_else(FetchResponse::extension_abort)
        })
    }
}

/// The composed chain. Cheap to share behind an `Arc`.
pub struct FetchPipeline {
    layers: Vec<Arc<dyn FetchLayer>>,
    transport: Arc<dyn Transport>,
}

impl FetchPipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            layers: Vec::new(),
            transport,
        }
    }

    /// Append a layer; layers added first run outermost.
    pub fn layer(mut self, layer: Arc<dyn FetchLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Perform a fetch. Never fails; errors arrive as 5xx responses.
    pub async fn fetch(&self, request: FetchRequest, context: &FetchContext) -> FetchResponse {
        Next::new(&self.layers, self.transport.as_ref())
            .run(request, context)
            .await
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl std::fmt::Debug for FetchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPipeline")
            .field("layers", &self.layers.len())
            .finish()
    }
}
