//! Relay router daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                 RELAY ROUTER                  │
//!                      │                                               │
//!  connection handler  │  ┌──────────┐   ┌────────────┐   ┌─────────┐  │
//!  (port, destination) ┼─▶│ routing  │──▶│  port map  │──▶│affinity │  │
//!                      │  │  engine  │   └────────────┘   └────┬────┘  │
//!                      │  └────┬─────┘                         │       │
//!                      │       ▼                               ▼       │
//!                      │  ┌──────────────┐   ┌───────────────────────┐ │
//!   Arc<Server>  ◀─────┼──│load_balancer │◀──│ registry + health     │ │
//!                      │  └──────────────┘   └───────────────────────┘ │
//!                      │                                               │
//!                      │  config watcher · admin API · stats saver     │
//!                      └───────────────────────────────────────────────┘
//! ```

use arc_swap::ArcSwap;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use relay_router::admin::{self, AppState};
use relay_router::config::loader::load_or_default;
use relay_router::config::watcher::ConfigWatcher;
use relay_router::health::store;
use relay_router::lifecycle::shutdown::trigger_on_ctrl_c;
use relay_router::observability::{logging, metrics};
use relay_router::{RoutingEngine, Shutdown};

#[derive(Parser)]
#[command(name = "relay-router")]
#[command(about = "Routing decision engine for a multi-server relay client", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "relay-router.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(&args.config)?;

    logging::init(&config.observability);
    tracing::info!("relay-router v{} starting", env!("CARGO_PKG_VERSION"));

    let engine = Arc::new(RoutingEngine::from_config(&config));
    let algorithm = engine.settings().algorithm;
    tracing::info!(
        config = ?args.config,
        local_port = config.listener.local_port,
        servers = config.servers.len(),
        port_map_rules = config.port_map.len(),
        algorithm = %algorithm,
        "Configuration loaded"
    );

    let stats_path = (!config.persistence.stats_path.is_empty())
        .then(|| PathBuf::from(&config.persistence.stats_path));
    if let Some(path) = &stats_path {
        store::restore(engine.registry(), path);
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let shared_config = Arc::new(ArcSwap::from_pointee(config.clone()));

    // Hot reload
    let (watcher, mut updates) = ConfigWatcher::new(&args.config);
    let _watcher_guard = match watcher.run() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };
    {
        let engine = engine.clone();
        let shared_config = shared_config.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(next) = updates.recv() => {
                        engine.apply_config(&next);
                        shared_config.store(Arc::new(next));
                        tracing::info!("Configuration reloaded");
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    let mut tasks = Vec::new();

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AppState::new(engine.clone(), shared_config.clone());
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, shutdown).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        }));
    }

    if let Some(path) = stats_path {
        let interval = Duration::from_secs(config.persistence.save_interval_secs.max(1));
        tasks.push(tokio::spawn(store::run_saver(
            engine.registry().clone(),
            path,
            interval,
            shutdown.clone(),
        )));
    }

    // Sticky-cache maintenance for ports that go quiet
    {
        let engine = engine.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = engine.sweep_all(std::time::Instant::now());
                        if swept > 0 {
                            tracing::debug!(swept, "Expired sticky entries removed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));
    }

    trigger_on_ctrl_c(shutdown.clone()).await;

    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
