//! Shared utilities for integration tests.
#![allow(dead_code)]

use arc_swap::ArcSwap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use relay_router::admin::{self, AppState};
use relay_router::config::schema::{PortMapConfig, PortMapMode, RouterConfig, ServerConfig};
use relay_router::health::tracker::ErrorKind;
use relay_router::{RoutingEngine, Server, Shutdown};

pub const ADMIN_KEY: &str = "test-admin-key";

/// A server config entry with an id, host and group.
pub fn server(id: &str, host: &str, group: &str) -> ServerConfig {
    ServerConfig {
        id: id.to_string(),
        host: host.to_string(),
        group: group.to_string(),
        ..Default::default()
    }
}

/// A proxy-mode port-map rule.
pub fn rule(port: u16, target: &str, mode: PortMapMode) -> PortMapConfig {
    PortMapConfig {
        port,
        target: target.to_string(),
        mode,
        ..Default::default()
    }
}

/// Balanced config over `servers` with the named algorithm.
pub fn config(algorithm: &str, servers: Vec<ServerConfig>) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.balance.algorithm = algorithm.to_string();
    config.balance.random = true;
    config.servers = servers;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

/// Three servers: a, b in group g1 and c in g2.
pub fn three_servers() -> Vec<ServerConfig> {
    vec![
        server("a", "10.0.0.1", "g1"),
        server("b", "10.0.0.2", "g1"),
        server("c", "10.0.0.3", "g2"),
    ]
}

/// Push a server's error streak to `streak`.
pub fn fail(server: &Server, streak: u64) {
    for _ in 0..streak {
        server.health().record_error(ErrorKind::Connect);
    }
}

/// A running admin API on an ephemeral port.
pub struct AdminHarness {
    pub addr: SocketAddr,
    pub engine: Arc<RoutingEngine>,
    pub shutdown: Shutdown,
}

impl AdminHarness {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the admin API for `config` and wait until it accepts connections.
pub async fn start_admin(config: RouterConfig) -> AdminHarness {
    let engine = Arc::new(RoutingEngine::from_config(&config));
    let state = AppState::new(engine.clone(), Arc::new(ArcSwap::from_pointee(config)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = admin::serve(listener, state, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    AdminHarness { addr, engine, shutdown }
}
