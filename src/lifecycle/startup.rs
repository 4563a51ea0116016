//! Startup orchestration.
//!
//! Fail fast: a bad config file or an unbindable address ends the process
//! before any traffic is accepted.

use std::path::Path;

use tokio::net::TcpListener;

use crate::config::loader::{load_config, ConfigError};
use crate::config::validation::validate_config;
use crate::config::GatewayConfig;

/// Load the config file, or validated defaults when no path is given.
///
/// Runs before the subscriber is installed, so it does not log.
pub fn load_startup_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let config = GatewayConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

/// Bind the client listener.
pub async fn bind_listener(config: &GatewayConfig) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");
    Ok(listener)
}

/// Start the Prometheus exporter when enabled.
pub fn start_metrics(config: &GatewayConfig) {
    if !config.observability.metrics_enabled {
        return;
    }
    match config.observability.metrics_address.parse() {
        Ok(addr) => crate::observability::metrics::init_metrics(addr),
        Err(e) => tracing::error!(
            metrics_address = %config.observability.metrics_address,
            error = %e,
            "Failed to parse metrics address"
        ),
    }
}
