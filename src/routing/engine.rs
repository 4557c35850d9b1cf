//! Routing engine.
//!
//! # Responsibilities
//! - Answer "which server handles this connection" for a local port and an
//!   optional destination
//! - Own per-port sticky caches and selection state
//! - Apply port-map rules, pinned index and the balancing algorithm in order
//! - Reset per-port state when the pool or the port map is rebuilt
//!
//! # Design Decisions
//! - `resolve` never blocks on I/O and never fails: exhaustion yields the
//!   sentinel error-server
//! - Each resolution reads one pool snapshot; reloads swap, never mutate
//! - Ports are partitioned in a `DashMap`, each with its own mutex, so one
//!   port's traffic never waits on another's

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::schema::{PortMapConfig, RouterConfig};
use crate::load_balancer::selected_first::scan_from;
use crate::load_balancer::{self, Algorithm, GroupFilter, SelectContext};
use crate::observability::metrics;
use crate::registry::pool::{Pool, ServerRegistry};
use crate::registry::server::Server;
use crate::routing::affinity::AffinityCache;
use crate::routing::port_map::{PortMap, PortRoute, PortTarget};

/// Minimum time between two sweeps of one port's sticky cache.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Balancing settings, validated from configuration.
#[derive(Debug, Clone)]
pub struct BalanceSettings {
    pub algorithm: Algorithm,
    /// Balance across the pool rather than using the pinned index.
    pub random: bool,
    pub random_in_group: bool,
    pub pinned_index: Option<usize>,
    pub same_host_for_same_target: bool,
    pub ttl: Duration,
    pub affinity_capacity: usize,
    pub max_continuous_errors: u64,
    pub local_port: u16,
}

impl BalanceSettings {
    pub fn from_config(config: &RouterConfig) -> Self {
        let balance = &config.balance;
        Self {
            algorithm: Algorithm::from_name_or_default(&balance.algorithm),
            random: balance.random,
            random_in_group: balance.random_in_group,
            pinned_index: Some(balance.index),
            same_host_for_same_target: balance.same_host_for_same_target,
            ttl: Duration::from_secs(balance.keep_visit_time),
            affinity_capacity: balance.affinity_capacity,
            max_continuous_errors: balance.max_continuous_errors,
            local_port: config.listener.local_port,
        }
    }
}

impl Default for BalanceSettings {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

/// One connection's routing question.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub local_port: u16,
    /// Destination host (or `host:port`) the client asked for.
    pub destination: Option<&'a str>,
    /// Honour sticky entries for this destination.
    pub session_affinity: bool,
    /// Operator "switch now": uniform random, no health gate, no stickiness.
    pub force_random: bool,
}

impl<'a> ResolveRequest<'a> {
    pub fn new(local_port: u16) -> Self {
        Self {
            local_port,
            destination: None,
            session_affinity: false,
            force_random: false,
        }
    }

    pub fn destination(mut self, destination: &'a str) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn sticky(mut self, enabled: bool) -> Self {
        self.session_affinity = enabled;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_random = true;
        self
    }
}

/// Which step of the decision produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forward,
    PortServer,
    Forced,
    Affinity,
    Pinned,
    Balanced,
    Exhausted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Forward => "forward",
            Outcome::PortServer => "port_map",
            Outcome::Forced => "forced",
            Outcome::Affinity => "affinity",
            Outcome::Pinned => "pinned",
            Outcome::Balanced => "balanced",
            Outcome::Exhausted => "exhausted",
        }
    }
}

/// Sticky cache and selection state of one local port.
#[derive(Debug)]
struct PortState {
    /// Pool generation the indices in this state refer to.
    generation: u64,
    affinity: AffinityCache,
    last_index: Option<usize>,
    last_sweep: Option<Instant>,
}

impl PortState {
    fn new(settings: &BalanceSettings, generation: u64) -> Self {
        Self {
            generation,
            affinity: AffinityCache::new(settings.affinity_capacity, settings.ttl),
            last_index: None,
            last_sweep: None,
        }
    }

    fn reset(&mut self, generation: u64) {
        self.generation = generation;
        self.affinity.clear();
        self.last_index = None;
        self.last_sweep = None;
    }

    fn maybe_sweep(&mut self, now: Instant) {
        let due = self
            .last_sweep
            .map_or(true, |at| now.saturating_duration_since(at) >= SWEEP_INTERVAL);
        if due {
            self.affinity.sweep(now);
            self.last_sweep = Some(now);
        }
    }
}

type PortSlot = Arc<Mutex<PortState>>;

fn lock(slot: &PortSlot) -> MutexGuard<'_, PortState> {
    // State is plain data; a panic mid-update cannot leave it unusable.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decides which upstream server handles each accepted connection.
///
/// Constructed once per process and shared by reference (usually `Arc`)
/// with every connection handler.
#[derive(Debug)]
pub struct RoutingEngine {
    registry: Arc<ServerRegistry>,
    settings: ArcSwap<BalanceSettings>,
    rules: ArcSwap<Vec<PortMapConfig>>,
    port_map: ArcSwap<PortMap>,
    ports: DashMap<u16, PortSlot>,
    sentinel: Arc<Server>,
}

impl RoutingEngine {
    /// An engine with an empty pool and no port-map rules.
    pub fn new(settings: BalanceSettings) -> Self {
        Self {
            registry: Arc::new(ServerRegistry::new()),
            settings: ArcSwap::from_pointee(settings),
            rules: ArcSwap::from_pointee(Vec::new()),
            port_map: ArcSwap::from_pointee(PortMap::default()),
            ports: DashMap::new(),
            sentinel: Arc::new(Server::error_server()),
        }
    }

    /// Build an engine and load servers and rules from configuration.
    pub fn from_config(config: &RouterConfig) -> Self {
        let engine = Self::new(BalanceSettings::from_config(config));
        engine.apply_config(config);
        engine
    }

    /// Apply a complete configuration snapshot (initial load or reload).
    ///
    /// The file is authoritative: enable flags and the pinned index set
    /// through the admin API are replaced by the configured values. Health
    /// counters carry over for ids still present.
    pub fn apply_config(&self, config: &RouterConfig) {
        self.settings.store(Arc::new(BalanceSettings::from_config(config)));
        self.rules.store(Arc::new(config.port_map.clone()));
        let servers = config.servers.iter().map(Server::from_config).collect();
        self.load(servers);
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> Arc<BalanceSettings> {
        self.settings.load_full()
    }

    /// Replace the server pool. All per-port state is reset and the port map
    /// is rebuilt against the new pool.
    pub fn load(&self, servers: Vec<Server>) {
        self.registry.load(servers);
        self.ports.clear();
        let rules = self.rules.load_full();
        self.rebuild(&rules);
    }

    /// Recompute the port map from `rules` and the current pool.
    ///
    /// Ports that drop out of the mapping lose their sticky cache and
    /// selection state.
    pub fn rebuild(&self, rules: &[PortMapConfig]) {
        let pool = self.registry.snapshot();
        let next = PortMap::build(rules, &pool);
        self.rules.store(Arc::new(rules.to_vec()));

        let previous = self.port_map.swap(Arc::new(next));
        let current = self.port_map.load();
        let stale: Vec<u16> = previous.ports().filter(|p| !current.contains(*p)).collect();
        for port in &stale {
            self.ports.remove(port);
        }

        metrics::record_port_map_size(current.len());
        tracing::info!(
            rules = rules.len(),
            active = current.len(),
            invalidated = stale.len(),
            "Port map rebuilt"
        );
    }

    /// The validated route for a mapped port.
    pub fn lookup(&self, port: u16) -> Option<PortRoute> {
        self.port_map.load().get(port).cloned()
    }

    /// Set the pinned index. Returns false when it is out of range.
    pub fn pin(&self, index: usize) -> bool {
        if index >= self.registry.snapshot().len() {
            return false;
        }
        self.settings.rcu(|current| BalanceSettings {
            pinned_index: Some(index),
            ..BalanceSettings::clone(current)
        });
        tracing::info!(index, "Pinned server index changed");
        true
    }

    /// Operator "switch now" for a port: a forced random pick that also
    /// becomes the pinned index.
    pub fn switch_random(&self, local_port: u16) -> Arc<Server> {
        let server = self.resolve(&ResolveRequest::new(local_port).forced());
        if !server.is_sentinel() {
            if let Some(index) = self.registry.snapshot().position(&server.id) {
                self.pin(index);
            }
        }
        server
    }

    /// Resolve the server for a connection.
    pub fn resolve(&self, req: &ResolveRequest<'_>) -> Arc<Server> {
        self.resolve_at(req, Instant::now())
    }

    /// [`RoutingEngine::resolve`] with an explicit clock.
    pub fn resolve_at(&self, req: &ResolveRequest<'_>, now: Instant) -> Arc<Server> {
        let pool = self.registry.snapshot();
        let settings = self.settings.load();
        let port_map = self.port_map.load();
        let route = port_map.get(req.local_port);

        let (server, outcome) = self.decide(req, route, &pool, &settings, now);
        metrics::record_resolve(outcome.as_str());
        if outcome == Outcome::Exhausted {
            tracing::debug!(
                port = req.local_port,
                pool = pool.len(),
                enabled = pool.enabled_count(),
                "No selectable server, returning sentinel"
            );
        }
        server
    }

    fn decide(
        &self,
        req: &ResolveRequest<'_>,
        route: Option<&PortRoute>,
        pool: &Pool,
        settings: &BalanceSettings,
        now: Instant,
    ) -> (Arc<Server>, Outcome) {
        let mut group = GroupFilter::Any;
        if let Some(route) = route {
            if let Some(target) = &route.forward {
                return (target.clone(), Outcome::Forward);
            }
            match &route.target {
                PortTarget::Server(id) => {
                    return match pool.position(id).and_then(|i| pool.get(i)) {
                        Some(server) if server.enabled => (server.clone(), Outcome::PortServer),
                        _ => (self.sentinel.clone(), Outcome::Exhausted),
                    };
                }
                PortTarget::Group(name) => group = GroupFilter::Named(name.as_str()),
                PortTarget::Pool => {}
            }
        }
        let scoped = group != GroupFilter::Any;
        if !scoped && settings.random_in_group {
            group = GroupFilter::SameAsReference;
        }

        let destination = req
            .destination
            .filter(|d| !d.is_empty())
            .or_else(|| route.and_then(|r| r.destination.as_deref()));

        let slot = self.port_slot(req.local_port, settings, pool.generation());
        let mut state = lock(&slot);
        if state.generation != pool.generation() {
            state.reset(pool.generation());
        }
        state.affinity.set_ttl(settings.ttl);

        let mut ctx = SelectContext::new(pool.servers());
        ctx.last_index = state.last_index;
        ctx.pinned_index = settings.pinned_index;
        ctx.group = group;
        ctx.max_continuous_errors = settings.max_continuous_errors;

        // 1. Operator override: no stickiness in either direction
        if req.force_random {
            return match load_balancer::select(&ctx, settings.algorithm, true) {
                Some(index) => {
                    state.last_index = Some(index);
                    (pool.servers()[index].clone(), Outcome::Forced)
                }
                None => (self.sentinel.clone(), Outcome::Exhausted),
            };
        }

        // 2. Sticky entry, consumed on use
        if req.session_affinity {
            if let Some(key) = destination {
                state.maybe_sweep(now);
                let hit = state.affinity.take_if(key, now, |entry| {
                    ctx.is_candidate(entry.index)
                        && pool
                            .get(entry.index)
                            .is_some_and(|s| s.id == entry.server_id && s.is_healthy())
                });
                if let Some(entry) = hit {
                    return (pool.servers()[entry.index].clone(), Outcome::Affinity);
                }
            }
        }

        // 3. Pinned index, 4. algorithmic balancing
        let picked = match settings.pinned_index.filter(|&i| i < pool.len()) {
            Some(pinned) if !settings.random && !scoped => {
                scan_from(&ctx, pinned).map(|i| (i, Outcome::Pinned))
            }
            _ => load_balancer::select(&ctx, settings.algorithm, false).map(|i| (i, Outcome::Balanced)),
        };

        match picked {
            Some((index, outcome)) => {
                let server = pool.servers()[index].clone();
                state.last_index = Some(index);
                if let Some(key) = destination {
                    state.affinity.set(key, index, &server.id, now);
                }
                (server, outcome)
            }
            // 5. Exhaustion
            None => (self.sentinel.clone(), Outcome::Exhausted),
        }
    }

    fn port_slot(&self, port: u16, settings: &BalanceSettings, generation: u64) -> PortSlot {
        self.ports
            .entry(port)
            .or_insert_with(|| Arc::new(Mutex::new(PortState::new(settings, generation))))
            .clone()
    }

    /// Sweep every port's sticky cache. For periodic maintenance.
    pub fn sweep_all(&self, now: Instant) -> usize {
        let slots: Vec<PortSlot> = self.ports.iter().map(|e| e.value().clone()).collect();
        slots.iter().map(|slot| {
            let mut state = lock(slot);
            state.last_sweep = Some(now);
            state.affinity.sweep(now)
        }).sum()
    }

    /// Number of sticky entries held for a port.
    pub fn affinity_len(&self, port: u16) -> usize {
        match self.ports.get(&port) {
            Some(slot) => lock(slot.value()).affinity.len(),
            None => 0,
        }
    }

    #[cfg(test)]
    fn has_port_state(&self, port: u16) -> bool {
        self.ports.contains_key(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PortMapMode;
    use crate::health::tracker::ErrorKind;

    const PORT: u16 = 1080;

    fn settings(algorithm: Algorithm) -> BalanceSettings {
        BalanceSettings {
            algorithm,
            random: true,
            random_in_group: false,
            pinned_index: Some(0),
            same_host_for_same_target: true,
            ttl: Duration::from_secs(60),
            affinity_capacity: 180,
            max_continuous_errors: 3,
            local_port: PORT,
        }
    }

    fn engine(algorithm: Algorithm, servers: Vec<Server>) -> RoutingEngine {
        let engine = RoutingEngine::new(settings(algorithm));
        engine.load(servers);
        engine
    }

    fn abc() -> Vec<Server> {
        vec![
            Server::new("a", "10.0.0.1", 1).with_group("g1"),
            Server::new("b", "10.0.0.2", 1).with_group("g1"),
            Server::new("c", "10.0.0.3", 1).with_group("g2"),
        ]
    }

    #[test]
    fn test_empty_pool_returns_sentinel() {
        let engine = engine(Algorithm::RoundRobin, Vec::new());
        assert!(engine.resolve(&ResolveRequest::new(PORT)).is_sentinel());
        assert!(engine.resolve(&ResolveRequest::new(PORT).forced()).is_sentinel());
    }

    #[test]
    fn test_round_robin_rotation() {
        let engine = engine(Algorithm::RoundRobin, abc());
        let ids: Vec<_> = (0..4)
            .map(|_| engine.resolve(&ResolveRequest::new(PORT)).id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_ports_have_independent_rotation() {
        let engine = engine(Algorithm::RoundRobin, abc());
        assert_eq!(engine.resolve(&ResolveRequest::new(1080)).id, "a");
        assert_eq!(engine.resolve(&ResolveRequest::new(1080)).id, "b");
        assert_eq!(engine.resolve(&ResolveRequest::new(1081)).id, "a");
    }

    #[test]
    fn test_sticky_hit_is_single_use() {
        let engine = engine(Algorithm::RoundRobin, abc());
        let t0 = Instant::now();
        let req = ResolveRequest::new(PORT).destination("example.com").sticky(true);

        let first = engine.resolve_at(&req, t0);
        assert_eq!(first.id, "a");
        assert_eq!(engine.affinity_len(PORT), 1);

        let second = engine.resolve_at(&req, t0 + Duration::from_secs(5));
        assert_eq!(second.id, "a");
        assert_eq!(engine.affinity_len(PORT), 0);

        // Consumed: balancing resumes and re-records
        let third = engine.resolve_at(&req, t0 + Duration::from_secs(6));
        assert_eq!(third.id, "b");
        assert_eq!(engine.affinity_len(PORT), 1);
    }

    #[test]
    fn test_sticky_expires() {
        let engine = engine(Algorithm::RoundRobin, abc());
        let t0 = Instant::now();
        let req = ResolveRequest::new(PORT).destination("example.com").sticky(true);
        assert_eq!(engine.resolve_at(&req, t0).id, "a");
        assert_eq!(engine.resolve_at(&req, t0 + Duration::from_secs(61)).id, "b");
    }

    #[test]
    fn test_sticky_invalidated_by_error() {
        let engine = engine(Algorithm::RoundRobin, abc());
        let t0 = Instant::now();
        let req = ResolveRequest::new(PORT).destination("example.com").sticky(true);
        let first = engine.resolve_at(&req, t0);
        first.health().record_error(ErrorKind::Timeout);
        assert_ne!(engine.resolve_at(&req, t0).id, first.id);
    }

    #[test]
    fn test_sticky_ignored_when_disabled_by_caller() {
        let engine = engine(Algorithm::RoundRobin, abc());
        let t0 = Instant::now();
        let first = engine.resolve_at(&ResolveRequest::new(PORT).destination("x"), t0);
        let second = engine.resolve_at(&ResolveRequest::new(PORT).destination("x"), t0);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_forced_random_skips_affinity() {
        let engine = engine(Algorithm::LowException, vec![Server::new("a", "h", 1)]);
        let only = engine.registry().get("a").unwrap();
        for _ in 0..5 {
            only.health().record_error(ErrorKind::Connect);
        }
        let req = ResolveRequest::new(PORT).destination("example.com").sticky(true).forced();
        assert_eq!(engine.resolve(&req).id, "a");
        assert_eq!(engine.affinity_len(PORT), 0);
    }

    #[test]
    fn test_pinned_index_when_not_random() {
        let mut s = settings(Algorithm::RoundRobin);
        s.random = false;
        s.pinned_index = Some(1);
        let engine = RoutingEngine::new(s);
        engine.load(abc());
        for _ in 0..3 {
            assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "b");
        }

        engine.registry().set_enabled("b", false);
        assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "c");
    }

    #[test]
    fn test_pin_and_switch() {
        let mut s = settings(Algorithm::RoundRobin);
        s.random = false;
        let engine = RoutingEngine::new(s);
        engine.load(abc());

        assert!(engine.pin(2));
        assert!(!engine.pin(3));
        assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "c");

        let switched = engine.switch_random(PORT);
        assert!(!switched.is_sentinel());
        let pinned = engine.settings().pinned_index.unwrap();
        assert_eq!(engine.registry().list()[pinned].id, switched.id);
    }

    #[test]
    fn test_port_map_group_target() {
        let engine = engine(Algorithm::RoundRobin, abc());
        engine.rebuild(&[PortMapConfig {
            port: 1090,
            target: "g2".into(),
            mode: PortMapMode::RuleProxy,
            ..Default::default()
        }]);
        for _ in 0..3 {
            assert_eq!(engine.resolve(&ResolveRequest::new(1090)).id, "c");
        }
        assert_eq!(engine.lookup(1090).unwrap().mode, PortMapMode::RuleProxy);
    }

    #[test]
    fn test_port_map_server_target() {
        let engine = engine(Algorithm::LowException, abc());
        engine.rebuild(&[PortMapConfig {
            port: 1091,
            target: "b".into(),
            ..Default::default()
        }]);
        assert_eq!(engine.resolve(&ResolveRequest::new(1091)).id, "b");
        engine.registry().set_enabled("b", false);
        assert!(engine.resolve(&ResolveRequest::new(1091)).is_sentinel());
    }

    #[test]
    fn test_port_map_forward() {
        let engine = engine(Algorithm::LowException, Vec::new());
        engine.rebuild(&[PortMapConfig {
            port: 2222,
            mode: PortMapMode::Forward,
            server_addr: "192.168.1.5".into(),
            server_port: 22,
            ..Default::default()
        }]);
        let target = engine.resolve(&ResolveRequest::new(2222));
        assert_eq!(target.host, "192.168.1.5");
        assert_eq!(target.port, 22);
    }

    #[test]
    fn test_rule_destination_used_as_sticky_key() {
        let engine = engine(Algorithm::RoundRobin, abc());
        engine.rebuild(&[PortMapConfig {
            port: 1092,
            server_addr: "db.internal".into(),
            server_port: 5432,
            ..Default::default()
        }]);
        let req = ResolveRequest::new(1092).sticky(true);
        let first = engine.resolve(&req);
        assert_eq!(engine.affinity_len(1092), 1);
        assert_eq!(engine.resolve(&req).id, first.id);
    }

    #[test]
    fn test_rebuild_invalidates_removed_ports() {
        let engine = engine(Algorithm::RoundRobin, abc());
        let rule = PortMapConfig {
            port: 1090,
            target: "g1".into(),
            ..Default::default()
        };
        engine.rebuild(&[rule]);
        engine.resolve(&ResolveRequest::new(1090).destination("x"));
        engine.resolve(&ResolveRequest::new(PORT).destination("x"));
        assert!(engine.has_port_state(1090));

        engine.rebuild(&[]);
        assert!(!engine.has_port_state(1090));
        assert!(engine.has_port_state(PORT));
        assert_eq!(engine.affinity_len(PORT), 1);
    }

    #[test]
    fn test_load_resets_port_state() {
        let engine = engine(Algorithm::RoundRobin, abc());
        assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "a");
        assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "b");
        engine.load(abc());
        assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "a");
    }

    #[test]
    fn test_stale_rule_dropped_on_reload() {
        let engine = engine(Algorithm::RoundRobin, abc());
        engine.rebuild(&[PortMapConfig {
            port: 1093,
            target: "c".into(),
            ..Default::default()
        }]);
        assert!(engine.lookup(1093).is_some());

        engine.load(vec![Server::new("a", "10.0.0.1", 1)]);
        assert!(engine.lookup(1093).is_none());
        // Unmapped port falls back to the pool
        assert_eq!(engine.resolve(&ResolveRequest::new(1093)).id, "a");
    }

    #[test]
    fn test_sweep_all() {
        let engine = engine(Algorithm::RoundRobin, abc());
        let t0 = Instant::now();
        engine.resolve_at(&ResolveRequest::new(PORT).destination("x"), t0);
        engine.resolve_at(&ResolveRequest::new(1081).destination("y"), t0);
        assert_eq!(engine.sweep_all(t0 + Duration::from_secs(1)), 0);
        assert_eq!(engine.sweep_all(t0 + Duration::from_secs(61)), 2);
    }
}
