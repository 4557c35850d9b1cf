//! Upstream relay server record.
//!
//! # Responsibilities
//! - Identity, address and group of one upstream server
//! - Opaque connection parameters handed to the connection layer
//! - Shared handle to the server's health counters
//! - The sentinel error-server returned when nothing is selectable

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::schema::ServerConfig;
use crate::health::tracker::ServerHealth;

/// Host of the sentinel error-server. Connecting to it always fails.
pub const SENTINEL_HOST: &str = "invalid";

/// Connection parameters the router never interprets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub method: String,
    pub password: String,
    pub protocol: String,
    pub protocol_param: String,
    pub obfs: String,
    pub obfs_param: String,
}

/// A single upstream server.
///
/// Records are immutable once published in a pool; enabling or disabling a
/// server publishes a new record that shares the same [`ServerHealth`].
#[derive(Debug, Clone)]
pub struct Server {
    /// Unique identifier within a pool.
    pub id: String,
    pub host: String,
    pub port: u16,
    /// UDP relay port, 0 when the TCP port is used.
    pub udp_port: u16,
    pub group: String,
    pub remarks: String,
    pub enabled: bool,
    pub params: ConnectParams,
    health: Arc<ServerHealth>,
}

impl Server {
    /// Create an enabled server with fresh health counters.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            udp_port: 0,
            group: String::new(),
            remarks: String::new(),
            enabled: true,
            params: ConnectParams::default(),
            health: Arc::new(ServerHealth::new()),
        }
    }

    /// Builder-style group assignment.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Builder-style enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build a server from its configuration entry.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            host: config.host.clone(),
            port: config.port,
            udp_port: config.udp_port,
            group: config.group.clone(),
            remarks: config.remarks.clone(),
            enabled: config.enabled,
            params: ConnectParams {
                method: config.method.clone(),
                password: config.password.clone(),
                protocol: config.protocol.clone(),
                protocol_param: config.protocol_param.clone(),
                obfs: config.obfs.clone(),
                obfs_param: config.obfs_param.clone(),
            },
            health: Arc::new(ServerHealth::new()),
        }
    }

    /// The placeholder returned when no real server can be selected.
    pub fn error_server() -> Self {
        Self::new("", SENTINEL_HOST, 0)
    }

    /// A direct-forward target for a port-map rule. It never joins a pool.
    pub fn forward_target(port: u16, addr: impl Into<String>, target_port: u16) -> Self {
        Self::new(format!("forward:{}", port), addr, target_port)
    }

    pub fn is_sentinel(&self) -> bool {
        self.id.is_empty() && self.host == SENTINEL_HOST
    }

    pub fn health(&self) -> &ServerHealth {
        &self.health
    }

    /// Carry health counters over from a previous record of the same server.
    pub fn adopt_health(&mut self, previous: &Server) {
        self.health = previous.health.clone();
    }

    /// Enabled and without a running error streak.
    pub fn is_healthy(&self) -> bool {
        self.enabled && self.health.continuous_errors() == 0
    }

    /// `remarks (host:port)`, bracketing IPv6 literals.
    pub fn friendly_name(&self) -> String {
        self.format_name(&self.host)
    }

    /// Like [`Server::friendly_name`] but with the middle of the address masked.
    pub fn hidden_name(&self) -> String {
        self.format_name(&hide_host(&self.host))
    }

    fn format_name(&self, host: &str) -> String {
        let addr = if self.host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        };
        if self.remarks.is_empty() {
            addr
        } else {
            format!("{} ({})", self.remarks, addr)
        }
    }
}

/// Stable id for a server configured without one.
///
/// The same address and remarks always yield the same id; `salt` separates
/// entries that would otherwise collide.
pub fn derive_id(host: &str, port: u16, remarks: &str, salt: usize) -> String {
    let name = format!("{}:{}#{}#{}", host, port, remarks, salt);
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes())
        .simple()
        .to_string()
}

/// Mask a host for display: `1.2.3.4` → `1.**.4`, `a.example.com` → `*.example.com`.
pub fn hide_host(host: &str) -> String {
    match host.parse::<IpAddr>() {
        Ok(ip) => {
            let sep = if ip.is_ipv4() { '.' } else { ':' };
            let parts: Vec<&str> = host.split(sep).collect();
            let first = parts.first().copied().unwrap_or_default();
            let last = parts.last().copied().unwrap_or_default();
            let mut out = String::new();
            if !first.is_empty() {
                out.push_str(first);
                out.push(sep);
            }
            out.push_str("**");
            if !last.is_empty() {
                out.push(sep);
                out.push_str(last);
            }
            out
        }
        Err(_) => match host.get(1..).and_then(|rest| rest.find('.')) {
            Some(pos) => format!("*{}", &host[pos + 1..]),
            None => host.to_string(),
        },
    }
}
