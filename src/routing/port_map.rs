//! Port-map registry.
//!
//! # Responsibilities
//! - Validate raw port-map rules against the current server pool
//! - Resolve each rule's target to a server, a group, or the whole pool
//! - Drop stale rules (unknown id/group) with a warning, never an error
//!
//! # Design Decisions
//! - Built wholesale from rules + pool; never patched in place
//! - Server ids win over group names when both match

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::schema::{PortMapConfig, PortMapMode};
use crate::registry::pool::Pool;
use crate::registry::server::Server;

/// What a mapped port selects from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortTarget {
    /// The whole pool.
    Pool,
    /// A single server, by id.
    Server(String),
    /// Servers of one group.
    Group(String),
}

/// A validated port-map rule.
#[derive(Debug, Clone)]
pub struct PortRoute {
    pub port: u16,
    pub mode: PortMapMode,
    pub target: PortTarget,
    /// Fixed destination (`host:port`) for traffic on this port, if any.
    pub destination: Option<String>,
    /// Direct target for [`PortMapMode::Forward`] rules.
    pub forward: Option<Arc<Server>>,
}

/// Validated mapping from local port to route.
#[derive(Debug, Default)]
pub struct PortMap {
    routes: HashMap<u16, PortRoute>,
}

impl PortMap {
    /// Resolve `rules` against `pool`. Invalid or stale rules are skipped.
    pub fn build(rules: &[PortMapConfig], pool: &Pool) -> Self {
        let mut routes = HashMap::new();

        for rule in rules {
            if !rule.enabled {
                continue;
            }
            if rule.port == 0 {
                tracing::warn!(remarks = %rule.remarks, "Port-map rule without a port dropped");
                continue;
            }

            let destination = if !rule.server_addr.is_empty() && rule.server_port != 0 {
                Some(format!("{}:{}", rule.server_addr, rule.server_port))
            } else {
                None
            };

            let route = match rule.mode {
                PortMapMode::Forward => {
                    if destination.is_none() {
                        tracing::warn!(port = rule.port, "Forward rule without a target address dropped");
                        continue;
                    }
                    PortRoute {
                        port: rule.port,
                        mode: rule.mode,
                        target: PortTarget::Pool,
                        destination,
                        forward: Some(Arc::new(Server::forward_target(
                            rule.port,
                            rule.server_addr.clone(),
                            rule.server_port,
                        ))),
                    }
                }
                PortMapMode::ForceProxy | PortMapMode::RuleProxy => {
                    let target = if rule.target.is_empty() {
                        PortTarget::Pool
                    } else if pool.position(&rule.target).is_some() {
                        PortTarget::Server(rule.target.clone())
                    } else if pool.has_group(&rule.target) {
                        PortTarget::Group(rule.target.clone())
                    } else {
                        tracing::warn!(
                            port = rule.port,
                            target = %rule.target,
                            "Port-map rule references unknown server or group, dropped"
                        );
                        continue;
                    };
                    PortRoute {
                        port: rule.port,
                        mode: rule.mode,
                        target,
                        destination,
                        forward: None,
                    }
                }
            };

            if routes.insert(rule.port, route).is_some() {
                tracing::warn!(port = rule.port, "Duplicate port-map rule, last one wins");
            }
        }

        Self { routes }
    }

    pub fn get(&self, port: u16) -> Option<&PortRoute> {
        self.routes.get(&port)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.routes.contains_key(&port)
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.routes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
