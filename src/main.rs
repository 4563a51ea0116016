//! ESI gateway.
//!
//! Proxies client requests to the default backend and composes HTML pages
//! from fragments declared with `esi:` directives.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ fetch pipeline ──▶ origin page
//!                    │                                   │
//!                    │            ┌──────────────────────┘
//!                    ▼            ▼
//!               esi::Aggregator (scanner → elements → renderer)
//!                    │
//!                    ├──▶ cache::fragment (documents, inline fragments)
//!                    └──▶ fetch pipeline (events → HTTP cache → pooled transport)
//!                                                      │
//!     Client ◀── composed page ◀───────────────────────┘ fragments
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use esi_gateway::config::watcher::ConfigWatcher;
use esi_gateway::http::HttpServer;
use esi_gateway::lifecycle::{signals, startup, Shutdown};
use esi_gateway::observability;

#[derive(Parser, Debug)]
#[command(name = "esi-gateway", version, about = "ESI fragment aggregation gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload backends when the configuration file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = startup::load_startup_config(cli.config.as_deref())?;

    let level = &config.observability.log_level;
    observability::init_logging(&format!("esi_gateway={0},tower_http={0}", level));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "esi-gateway starting");
    if cli.config.is_none() {
        tracing::warn!("No config file given, running with defaults and no backends");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        default_backend = ?config.default_backend,
        max_connections = config.pool.max_connections,
        "Configuration loaded"
    );

    startup::start_metrics(&config);

    let listener = startup::bind_listener(&config).await?;

    // The watcher stops when its handle is dropped.
    let (_watcher, config_updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (Some(watcher.run()?), rx)
        }
        _ => {
            let (_tx, rx) = mpsc::unbounded_channel();
            (None, rx)
        }
    };

    let server = HttpServer::new(config)?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
