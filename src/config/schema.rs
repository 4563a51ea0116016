//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the ESI gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Backend whose pages are proxied and composed by the HTTP front end.
    pub default_backend: Option<String>,

    /// Named backends (providers) addressable from `$PROVIDER({name})`.
    pub backends: Vec<BackendConfig>,

    /// Outbound connection pool settings.
    pub pool: PoolConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// ESI processing settings.
    pub esi: EsiConfig,

    /// HTTP response cache settings.
    pub http_cache: HttpCacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body forwarded to the origin, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// A named backend origin.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Provider name used in templates.
    pub name: String,

    /// Base URL (e.g., "http://127.0.0.1:3000").
    pub base_url: String,
}

/// Outbound connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent outbound requests. Extra requests queue.
    pub max_connections: usize,

    /// Idle keep-alive connections retained per host.
    pub max_idle_per_host: usize,

    /// How long a fetch may wait in the queue for a free connection.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            max_idle_per_host: 20,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Timeout configuration for outbound fetches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// ESI processing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EsiConfig {
    /// Maximum nesting of includes inside included content.
    pub max_depth: usize,

    /// Redirect hops an include follows before giving up.
    pub max_redirects: usize,

    /// Expiration applied to fetched fragments. `None` keeps them forever.
    pub fragment_ttl_secs: Option<u64>,

    /// Content types whose bodies are scanned for directives.
    pub parseable_content_types: Vec<String>,

    /// Incoming request headers copied onto fragment fetches.
    pub forward_headers: Vec<String>,
}

impl Default for EsiConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_redirects: 5,
            fragment_ttl_secs: None,
            parseable_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            forward_headers: vec![
                "accept-language".to_string(),
                "cookie".to_string(),
                "user-agent".to_string(),
            ],
        }
    }
}

/// HTTP response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpCacheConfig {
    /// Enable the Cache-Control aware response cache.
    pub enabled: bool,

    /// Stored responses before new ones are refused.
    pub max_entries: usize,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
