//! Outbound HTTP transport with a bounded connection budget.
//!
//! # Responsibilities
//! - Send one request and buffer the complete response
//! - Bound concurrent outbound requests; queue the excess
//! - Apply connect and request timeouts
//!
//! # Design Decisions
//! - A semaphore permit is held from send until the body is fully read and
//!   dropped on every exit path, so no slot can leak
//! - Redirects are never followed here; includes follow them explicitly
//! - Waiting for a permit is bounded; exhaustion is a transport error

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::config::GatewayConfig;
use crate::fetch::types::{FetchRequest, FetchResponse, TransportError};
use crate::observability::metrics;

/// Something that can execute a request against a backend.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<FetchResponse, TransportError>>;

    /// Requests currently holding a connection slot.
    fn in_flight(&self) -> usize {
        0
    }
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    max_connections: usize,
    acquire_timeout: Duration,
}

impl HttpTransport {
    /// Build the client from pool and timeout settings.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .pool_max_idle_per_host(config.pool.max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(
            client,
            config.pool.max_connections,
            Duration::from_millis(config.pool.acquire_timeout_ms),
        ))
    }

    pub fn with_client(client: reqwest::Client, max_connections: usize, acquire_timeout: Duration) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            acquire_timeout,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    async fn exchange(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        // Reading the whole body hands the connection back to the pool.
        let body = response.bytes().await?;

        Ok(FetchResponse { status, headers, body })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
        Box::pin(async move {
            let wait_start = Instant::now();
            let _permit = match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(TransportError::Request("connection pool closed".to_string()));
                }
                Err(_) => {
                    let waited = self.acquire_timeout.as_millis() as u64;
                    return Err(TransportError::PoolExhausted(waited));
                }
            };
            metrics::record_pool_wait(wait_start);

            tracing::debug!(
                method = %request.method,
                url = %request.url,
                in_flight = self.in_flight(),
                "Sending backend request"
            );
            self.exchange(request).await
        })
    }

    fn in_flight(&self) -> usize {
        self.max_connections - self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    async fn slow_backend(delay: Duration) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                        .await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    fn transport(max_connections: usize, acquire_timeout: Duration) -> HttpTransport {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpTransport::with_client(client, max_connections, acquire_timeout)
    }

    #[tokio::test]
    async fn test_requests_beyond_pool_queue_and_succeed() {
        let url = slow_backend(Duration::from_millis(50)).await;
        let transport = Arc::new(transport(2, Duration::from_secs(5)));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let transport = transport.clone();
            let url = url.clone();
            tasks.push(tokio::spawn(async move {
                transport.send(&FetchRequest::get(url)).await
            }));
        }
        for task in tasks {
            let response = task.await.unwrap().unwrap();
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(&response.body[..], b"ok");
        }
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_pool_wait_is_bounded() {
        let url = slow_backend(Duration::from_millis(500)).await;
        let transport = Arc::new(transport(1, Duration::from_millis(50)));

        let busy = {
            let transport = transport.clone();
            let url = url.clone();
            tokio::spawn(async move { transport.send(&FetchRequest::get(url)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = transport.send(&FetchRequest::get(url)).await.unwrap_err();
        assert!(matches!(err, TransportError::PoolExhausted(50)));

        assert!(busy.await.unwrap().is_ok());
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused_releases_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = transport(1, Duration::from_secs(1));
        let url = Url::parse(&format!("http://{}/", addr)).unwrap();
        let err = transport.send(&FetchRequest::get(url)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(transport.in_flight(), 0);
    }
}
