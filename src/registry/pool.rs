//! Server registry.
//!
//! # Responsibilities
//! - Own the authoritative, ordered server pool
//! - Replace the pool atomically on reload (copy-on-write)
//! - Look up servers by id and apply administrative enable/disable
//! - Carry health counters across reloads for servers that keep their id

use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::health::tracker::HealthSnapshot;
use crate::observability::metrics;
use crate::registry::server::{derive_id, Server};

/// An immutable, ordered snapshot of servers.
///
/// Order is significant: it defines round-robin order and what a pinned
/// index refers to.
#[derive(Debug, Default)]
pub struct Pool {
    servers: Vec<Arc<Server>>,
    /// Incremented on every full `load`.
    generation: u64,
}

impl Pool {
    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Server>> {
        self.servers.get(index)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.servers.iter().position(|s| s.id == id)
    }

    pub fn enabled_count(&self) -> usize {
        self.servers.iter().filter(|s| s.enabled).count()
    }

    pub fn has_group(&self, group: &str) -> bool {
        !group.is_empty() && self.servers.iter().any(|s| s.group == group)
    }
}

/// Owner of the current [`Pool`].
///
/// Readers call [`ServerRegistry::snapshot`] and keep the returned `Arc` for
/// the duration of one decision; a concurrent `load` never tears it.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    pool: ArcSwap<Pool>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole pool.
    ///
    /// Servers whose id already exists keep their health counters. Blank or
    /// duplicate ids are replaced by ids derived from the server address.
    /// Concurrent loads each publish their own generation.
    pub fn load(&self, servers: Vec<Server>) {
        let mut rekeyed = Vec::new();
        let mut published = (0, 0, 0);

        self.pool.rcu(|current| {
            rekeyed.clear();
            let previous: HashMap<&str, &Arc<Server>> = current
                .servers
                .iter()
                .map(|s| (s.id.as_str(), s))
                .collect();

            let mut seen: HashSet<String> = HashSet::new();
            let keep: Vec<bool> = servers
                .iter()
                .map(|s| !s.id.is_empty() && seen.insert(s.id.clone()))
                .collect();

            let mut next = Vec::with_capacity(servers.len());
            for (server, keep) in servers.iter().zip(keep) {
                let mut server = server.clone();
                if !keep {
                    let fresh = (0..)
                        .map(|salt| derive_id(&server.host, server.port, &server.remarks, salt))
                        .find(|id| !seen.contains(id))
                        .unwrap_or_default();
                    rekeyed.push((std::mem::replace(&mut server.id, fresh.clone()), fresh.clone()));
                    seen.insert(fresh);
                }
                if let Some(prev) = previous.get(server.id.as_str()) {
                    server.adopt_health(prev);
                }
                next.push(Arc::new(server));
            }

            let pool = Pool {
                servers: next,
                generation: current.generation + 1,
            };
            published = (pool.len(), pool.enabled_count(), pool.generation);
            pool
        });

        for (old_id, new_id) in &rekeyed {
            tracing::warn!(old_id = %old_id, new_id = %new_id, "Blank or duplicate server id, re-keyed");
        }
        let (total, enabled, generation) = published;
        tracing::info!(servers = total, enabled, generation, "Server pool loaded");
        metrics::record_pool_size(total, enabled);
    }

    /// The current pool. Never absent; may be empty.
    pub fn snapshot(&self) -> Arc<Pool> {
        self.pool.load_full()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Server>> {
        self.pool.load().servers.iter().find(|s| s.id == id).cloned()
    }

    /// All servers, in pool order.
    pub fn list(&self) -> Vec<Arc<Server>> {
        self.pool.load().servers.clone()
    }

    /// Enable or disable a server. Returns false for an unknown id.
    ///
    /// Publishes a new pool that differs only in that record; the generation
    /// is unchanged so per-port state stays valid.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut found = false;
        self.pool.rcu(|pool| {
            found = false;
            let servers = pool
                .servers
                .iter()
                .map(|s| {
                    if s.id == id {
                        found = true;
                        Arc::new(Server::clone(s).with_enabled(enabled))
                    } else {
                        s.clone()
                    }
                })
                .collect();
            Pool { servers, generation: pool.generation }
        });
        if found {
            tracing::info!(id = %id, enabled, "Server enable flag changed");
        }
        found
    }

    /// Restore persisted counters for servers present in the pool.
    pub fn restore_health(&self, stats: &HashMap<String, HealthSnapshot>) -> usize {
        let pool = self.pool.load();
        let mut restored = 0;
        for server in pool.servers.iter() {
            if let Some(snap) = stats.get(&server.id) {
                server.health().restore(snap);
                restored += 1;
            }
        }
        restored
    }

    /// Health snapshots keyed by server id.
    pub fn health_snapshots(&self) -> HashMap<String, HealthSnapshot> {
        self.pool
            .load()
            .servers
            .iter()
            .map(|s| (s.id.clone(), s.health().snapshot()))
            .collect()
    }
}
