//! Configuration validation and fix-up.
//!
//! # Responsibilities
//! - Repair values the router can default sensibly (`fix_config`)
//! - Reject values it cannot (`validate_config`)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Fix-up runs before validation so repaired fields are never reported

use std::collections::HashSet;

use crate::config::schema::{PortMapMode, RouterConfig};
use crate::registry::server::derive_id;
use crate::routing::affinity::DEFAULT_TTL;

const DEFAULT_LOCAL_PORT: u16 = 1080;

/// A semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("server #{index} has a blank host")]
    BlankHost { index: usize },
    #[error("server #{index} ({host}) has port 0")]
    InvalidServerPort { index: usize, host: String },
    #[error("port-map rule #{index} has port 0")]
    InvalidMappedPort { index: usize },
    #[error("forward rule for port {port} needs server_addr and server_port")]
    ForwardWithoutTarget { port: u16 },
    #[error("balance.affinity_capacity must be greater than 0")]
    ZeroAffinityCapacity,
}

/// Repair defaultable fields in place.
pub fn fix_config(config: &mut RouterConfig) {
    if config.balance.keep_visit_time == 0 {
        config.balance.keep_visit_time = DEFAULT_TTL.as_secs();
    }
    if config.listener.local_port == 0 {
        config.listener.local_port = DEFAULT_LOCAL_PORT;
    }
    if config.balance.index >= config.servers.len() {
        config.balance.index = 0;
    }

    // Explicit ids are claimed first so a derived id never displaces one
    let mut seen: HashSet<String> = HashSet::new();
    let mut keep = Vec::with_capacity(config.servers.len());
    for server in &config.servers {
        keep.push(!server.id.is_empty() && seen.insert(server.id.clone()));
    }
    for (server, keep) in config.servers.iter_mut().zip(keep) {
        if !keep {
            let fresh = (0..)
                .map(|salt| derive_id(&server.host, server.port, &server.remarks, salt))
                .find(|id| !seen.contains(id))
                .unwrap_or_default();
            if !server.id.is_empty() {
                tracing::warn!(old_id = %server.id, new_id = %fresh, "Duplicate server id, re-keyed");
            }
            server.id = fresh;
            seen.insert(server.id.clone());
        }
        if server.group.is_empty() {
            server.group = config.defaults.group.clone();
        }
        if server.password.is_empty() {
            server.password = config.defaults.password.clone();
        }
    }
}

/// Check the configuration, collecting every error.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (index, server) in config.servers.iter().enumerate() {
        if server.host.trim().is_empty() {
            errors.push(ValidationError::BlankHost { index });
        }
        if server.port == 0 {
            errors.push(ValidationError::InvalidServerPort {
                index,
                host: server.host.clone(),
            });
        }
    }

    for (index, rule) in config.port_map.iter().enumerate() {
        if rule.port == 0 {
            errors.push(ValidationError::InvalidMappedPort { index });
        }
        if rule.mode == PortMapMode::Forward
            && (rule.server_addr.trim().is_empty() || rule.server_port == 0)
        {
            errors.push(ValidationError::ForwardWithoutTarget { port: rule.port });
        }
    }

    if config.balance.affinity_capacity == 0 {
        errors.push(ValidationError::ZeroAffinityCapacity);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
