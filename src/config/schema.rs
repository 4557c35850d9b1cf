//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Local listener settings the router needs to know about.
    pub listener: ListenerConfig,

    /// Balancing and sticky-routing behaviour.
    pub balance: BalanceConfig,

    /// Values applied to server entries that leave them blank.
    pub defaults: DefaultsConfig,

    /// Upstream relay servers, in selection order.
    pub servers: Vec<ServerConfig>,

    /// Static local-port forwarding rules.
    pub port_map: Vec<PortMapConfig>,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Health counter persistence.
    pub persistence: PersistenceConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Main local proxy port.
    pub local_port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { local_port: 1080 }
    }
}

/// Balancing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Algorithm name (RoundRobin, Random, LowException, SelectedFirst).
    pub algorithm: String,

    /// Balance across the pool instead of using the pinned index.
    pub random: bool,

    /// Keep random picks inside the group of the current server.
    pub random_in_group: bool,

    /// Pinned server index.
    pub index: usize,

    /// Route repeat traffic for a destination to the same server.
    pub same_host_for_same_target: bool,

    /// Sticky entry lifetime in seconds.
    pub keep_visit_time: u64,

    /// Distinct destinations remembered per port.
    pub affinity_capacity: usize,

    /// Random selection skips servers with a longer error streak.
    pub max_continuous_errors: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            algorithm: "LowException".to_string(),
            random: true,
            random_in_group: false,
            index: 0,
            same_host_for_same_target: false,
            keep_visit_time: 180,
            affinity_capacity: 180,
            max_continuous_errors: 3,
        }
    }
}

/// Defaults for blank server fields.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DefaultsConfig {
    pub group: String,
    pub password: String,
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unique server identifier. When blank, derived from host, port and
    /// remarks so it is stable across reloads and restarts.
    pub id: String,

    /// Server host name or IP address.
    pub host: String,

    /// Server TCP port.
    pub port: u16,

    /// Server UDP port, 0 to reuse the TCP port.
    pub udp_port: u16,

    /// Group tag used to scope random selection and port-map rules.
    pub group: String,

    /// Human readable label.
    pub remarks: String,

    /// Disabled servers are never selected.
    pub enabled: bool,

    pub method: String,
    pub password: String,
    pub protocol: String,
    pub protocol_param: String,
    pub obfs: String,
    pub obfs_param: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            host: String::new(),
            port: 8388,
            udp_port: 0,
            group: String::new(),
            remarks: String::new(),
            enabled: true,
            method: "aes-256-cfb".to_string(),
            password: String::new(),
            protocol: "origin".to_string(),
            protocol_param: String::new(),
            obfs: "plain".to_string(),
            obfs_param: String::new(),
        }
    }
}

/// How traffic on a mapped port is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PortMapMode {
    /// Connect straight to the rule's address, no relay server.
    Forward,
    /// Always relay through the rule's target.
    #[default]
    ForceProxy,
    /// Relay through the rule's target subject to proxy rules.
    RuleProxy,
}

/// Static port-map rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortMapConfig {
    /// Local port the rule applies to.
    pub port: u16,

    /// Server id, group name, or empty for the whole pool.
    pub target: String,

    pub mode: PortMapMode,

    pub enabled: bool,

    pub remarks: String,

    /// Fixed destination host for traffic on this port.
    pub server_addr: String,

    /// Fixed destination port for traffic on this port.
    pub server_port: u16,
}

impl Default for PortMapConfig {
    fn default() -> Self {
        Self {
            port: 0,
            target: String::new(),
            mode: PortMapMode::default(),
            enabled: true,
            remarks: String::new(),
            server_addr: String::new(),
            server_port: 0,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
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
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Health counter persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSON file holding per-server counters. Empty disables persistence.
    pub stats_path: String,

    /// Seconds between periodic saves.
    pub save_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            stats_path: "transfer_log.json".to_string(),
            save_interval_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config: RouterConfig = toml::from_str(
            r#"
            [[servers]]
            id = "a"
            host = "10.0.0.1"
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.local_port, 1080);
        assert_eq!(config.balance.algorithm, "LowException");
        assert_eq!(config.balance.keep_visit_time, 180);
        assert_eq!(config.servers[0].port, 8388);
        assert!(config.servers[0].enabled);
        assert_eq!(config.servers[0].obfs, "plain");
    }

    #[test]
    fn test_port_map_toml() {
        let config: RouterConfig = toml::from_str(
            r#"
            [[port_map]]
            port = 1090
            target = "g1"
            mode = "rule_proxy"

            [[port_map]]
            port = 2222
            mode = "forward"
            server_addr = "192.168.1.5"
            server_port = 22
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.port_map.len(), 2);
        assert_eq!(config.port_map[0].mode, PortMapMode::RuleProxy);
        assert!(config.port_map[0].enabled);
        assert_eq!(config.port_map[1].mode, PortMapMode::Forward);
        assert!(!config.port_map[1].enabled);
    }
}
