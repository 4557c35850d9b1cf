//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_resolve_total` (counter): resolutions by `outcome`
//!   (affinity, pinned, balanced, forced, port_map, forward, exhausted)
//! - `relay_server_errors_total` (counter): server errors by `kind`
//! - `relay_pool_servers` (gauge): servers in the pool, by `state`
//! - `relay_port_map_rules` (gauge): active port-map rules
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Exposition is a Prometheus scrape endpoint owned by the exporter

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_counter!("relay_resolve_total", "Routing decisions by outcome");
            describe_counter!("relay_server_errors_total", "Upstream server errors by kind");
            describe_gauge!("relay_pool_servers", "Servers in the active pool");
            describe_gauge!("relay_port_map_rules", "Active port-map rules");
            tracing::info!(address = %addr, "Metrics endpoint listening");
        }
        Err(e) => {
            tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter");
        }
    }
}

pub fn record_resolve(outcome: &'static str) {
    counter!("relay_resolve_total", "outcome" => outcome).increment(1);
}

pub fn record_server_error(kind: &'static str) {
    counter!("relay_server_errors_total", "kind" => kind).increment(1);
}

pub fn record_pool_size(total: usize, enabled: usize) {
    gauge!("relay_pool_servers", "state" => "total").set(total as f64);
    gauge!("relay_pool_servers", "state" => "enabled").set(enabled as f64);
}

pub fn record_port_map_size(rules: usize) {
    gauge!("relay_port_map_rules").set(rules as f64);
}
