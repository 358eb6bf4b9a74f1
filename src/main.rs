//! Small engine parts search API server.
//!
//! ```text
//!     Client ──HTTP──▶ ┌──────────────────────────────────────────────┐
//!                      │ net::Listener (bounded accept)               │
//!                      │   → http::server (per-request demux)         │
//!                      │       ├─ Upgrade → http::websocket bridge    │
//!                      │       │            → realtime::NotificationHub│
//!                      │       └─ other   → http::pipeline            │
//!                      │                    → /api/health             │
//!                      │                    → /api/search/* (search)  │
//!                      │                    → 404 envelope            │
//!                      └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use parts_search_server::config::load_config;
use parts_search_server::http::HttpServer;
use parts_search_server::lifecycle::signals::spawn_signal_listener;
use parts_search_server::observability::{logging, metrics};
use parts_search_server::realtime::{NotificationHub, RealtimeService};
use parts_search_server::search::{SearchBackend, UnconfiguredSearch, UpstreamSearch};

#[derive(Parser)]
#[command(name = "parts-search-server")]
#[command(about = "HTTP + WebSocket front door for the small engine parts search API", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "PARTS_SEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port; wins over `PORT` and the config file.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.listener.port = port;
    }

    logging::init(&config.observability, config.service.environment);

    tracing::info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.service.environment,
        bind_address = %config.listener.bind_address(),
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let hub = Arc::new(NotificationHub::new());
    let search: Arc<dyn SearchBackend> = match &config.search.upstream {
        Some(upstream) => {
            tracing::info!(upstream = %upstream, "Forwarding searches upstream");
            Arc::new(UpstreamSearch::new(upstream, config.search.clone())?.with_notifier(hub.clone()))
        }
        None => {
            tracing::warn!("No search upstream configured; search requests will fail");
            Arc::new(UnconfiguredSearch)
        }
    };
    let realtime: Arc<dyn RealtimeService> = hub;

    let server = HttpServer::new(config, search, realtime);
    let bound = match server.bind().await {
        Ok(bound) => bound,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    spawn_signal_listener(bound.shutdown_handle());
    bound.run().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
