//! Pipeline layer answering from the HTTP response cache.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::cache::http::HttpResponseCache;
use crate::fetch::pipeline::{FetchLayer, Next};
use crate::fetch::types::{FetchContext, FetchRequest, FetchResponse};
use crate::observability::metrics;

pub struct HttpCacheLayer {
    cache: Arc<HttpResponseCache>,
}

impl HttpCacheLayer {
    pub fn new(cache: Arc<HttpResponseCache>) -> Self {
        Self { cache }
    }
}

impl FetchLayer for HttpCacheLayer {
    fn handle<'a>(
        &'a self,
        request: FetchRequest,
        context: &'a FetchContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, FetchResponse> {
        Box::pin(async move {
            let (lookup, cached) = self.cache.lookup(&request);
            metrics::record_http_cache(lookup);
            if let Some(response) = cached {
                tracing::debug!(url = %request.url, "HTTP cache hit");
                return response;
            }

            let response = next.run(request.clone(), context).await;
            if self.cache.store(&request, &response) {
                tracing::trace!(url = %request.url, "Response stored in HTTP cache");
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::pipeline::FetchPipeline;
    use crate::fetch::transport::Transport;
    use crate::fetch::types::TransportError;
    use axum::http::{header, HeaderValue, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct CountingTransport {
        calls: AtomicUsize,
        cache_control: &'static str,
    }

    impl Transport for CountingTransport {
        fn send<'a>(&'a self, _request: &'a FetchRequest) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(FetchResponse::new(StatusCode::OK, format!("response {}", n))
                    .with_header(header::CACHE_CONTROL, HeaderValue::from_static(self.cache_control)))
            })
        }
    }

    fn pipeline(cache_control: &'static str) -> (FetchPipeline, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
            cache_control,
        });
        let cache = Arc::new(HttpResponseCache::new(100));
        let pipeline = FetchPipeline::new(transport.clone()).layer(Arc::new(HttpCacheLayer::new(cache)));
        (pipeline, transport)
    }

    fn request() -> FetchRequest {
        FetchRequest::get(Url::parse("http://backend.local/cached").unwrap())
    }

    #[tokio::test]
    async fn test_cacheable_response_skips_network() {
        let (pipeline, transport) = pipeline("max-age=60");
        let first = pipeline.fetch(request(), &FetchContext::default()).await;
        let second = pipeline.fetch(request(), &FetchContext::default()).await;

        assert_eq!(first.body_text(), "response 1");
        assert_eq!(second.body_text(), "response 1");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_store_always_fetches() {
        let (pipeline, transport) = pipeline("no-store");
        pipeline.fetch(request(), &FetchContext::default()).await;
        let second = pipeline.fetch(request(), &FetchContext::default()).await;

        assert_eq!(second.body_text(), "response 2");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_authorized_answer_is_not_served_to_others() {
        let (pipeline, transport) = pipeline("max-age=60");
        let mut alice = request();
        alice.headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer alice"));
        let first = pipeline.fetch(alice, &FetchContext::default()).await;
        let anonymous = pipeline.fetch(request(), &FetchContext::default()).await;

        assert_eq!(first.body_text(), "response 1");
        assert_eq!(anonymous.body_text(), "response 2");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}
