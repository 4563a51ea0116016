//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use esi_gateway::config::{BackendConfig, GatewayConfig};
use esi_gateway::fetch::{FetchRequest, FetchResponse, Transport, TransportError};
use esi_gateway::{Aggregator, HttpServer, Shutdown};

/// A canned answer of the mock backend.
#[derive(Debug, Clone)]
pub struct Route {
    pub path: &'static str,
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Route {
    pub fn ok(path: &'static str, body: impl Into<String>) -> Self {
        Self {
            path,
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn html(path: &'static str, body: impl Into<String>) -> Self {
        Self::ok(path, body).header("Content-Type", "text/html")
    }

    pub fn redirect(path: &'static str, location: &str) -> Self {
        Self {
            path,
            status: 302,
            headers: vec![("Location", location.to_string())],
            body: "<response>Some content</response>".to_string(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Requests served by a mock backend, per path.
#[derive(Debug, Default)]
pub struct Hits(DashMap<String, usize>);

impl Hits {
    pub fn get(&self, path: &str) -> usize {
        self.0.get(path).map(|n| *n).unwrap_or(0)
    }
}

/// Start a raw-TCP mock backend on an ephemeral port.
///
/// Routes match on the path only; the query string is ignored. Unknown
/// paths answer 404. Every response closes the connection.
pub async fn start_mock_backend(routes: Vec<Route>) -> (SocketAddr, Arc<Hits>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);
    let hits = Arc::new(Hits::default());
    let served = hits.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let routes = routes.clone();
                    let hits = served.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, &routes, &hits).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, hits)
}

async fn serve(mut socket: TcpStream, routes: &[Route], hits: &Hits) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&head);
    let target = head.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or("/").to_string();
    *hits.0.entry(path.clone()).or_insert(0) += 1;

    let route = routes.iter().find(|r| r.path == path);
    let (status, headers, body) = match route {
        Some(r) => (r.status, r.headers.clone(), r.body.clone()),
        None => (404, Vec::new(), "not found".to_string()),
    };

    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let mut response = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));

    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

/// In-memory transport keyed by absolute URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryTransport {
    resources: DashMap<String, FetchResponse>,
    pub calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_resource(&self, url: &str, body: &str) {
        self.resources
            .insert(url.to_string(), FetchResponse::new(StatusCode::OK, body.to_string()));
    }

    pub fn add_response(&self, url: &str, response: FetchResponse) {
        self.resources.insert(url.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn send<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .resources
                .get(request.url.as_str())
                .map(|r| r.clone())
                .unwrap_or_else(|| FetchResponse::new(StatusCode::NOT_FOUND, "not found")))
        })
    }
}

/// HTML response for `MemoryTransport::add_response`.
pub fn html(body: &str) -> FetchResponse {
    FetchResponse::new(StatusCode::OK, body.to_string())
        .with_header(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/html"))
}

/// Config with one default backend and an ephemeral listener.
pub fn config_with_backend(name: &str, base_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.backends.push(BackendConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
    });
    config.default_backend = Some(name.to_string());
    config
}

/// A gateway running in the background.
pub struct Gateway {
    pub addr: SocketAddr,
    pub aggregator: Aggregator,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a gateway using the real transport.
pub async fn start_gateway(config: GatewayConfig) -> Gateway {
    let server = HttpServer::new(config.clone()).unwrap();
    spawn_server(server).await
}

/// Start a gateway over an in-memory transport.
pub async fn start_gateway_with(config: GatewayConfig, transport: Arc<dyn Transport>) -> Gateway {
    spawn_server(HttpServer::with_transport(config, transport)).await
}

async fn spawn_server(server: HttpServer) -> Gateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let aggregator = server.aggregator().clone();
    let shutdown = Shutdown::new();
    let (tx, rx) = mpsc::unbounded_channel();

    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx, signal).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    Gateway {
        addr,
        aggregator,
        shutdown,
        config_updates: tx,
    }
}

/// HTTP client that does not reuse connections between requests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
