//! Routing behaviour through the public engine API.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use relay_router::config::loader::parse_config;
use relay_router::config::schema::PortMapMode;
use relay_router::{ResolveRequest, RoutingEngine};

mod common;
use common::{config, fail, rule, server, three_servers};

const PORT: u16 = 1080;

#[test]
fn test_never_sentinel_with_a_healthy_server() {
    for algorithm in ["RoundRobin", "Random", "LowException", "SelectedFirst"] {
        let mut servers = three_servers();
        servers[0].enabled = false;
        let engine = RoutingEngine::from_config(&config(algorithm, servers));
        fail(&engine.registry().get("b").unwrap(), 4);

        for _ in 0..20 {
            let s = engine.resolve(&ResolveRequest::new(PORT));
            assert!(!s.is_sentinel(), "{} returned the sentinel", algorithm);
        }
    }
}

#[test]
fn test_empty_or_disabled_pool_returns_sentinel() {
    let engine = RoutingEngine::from_config(&config("LowException", Vec::new()));
    assert!(engine.resolve(&ResolveRequest::new(PORT)).is_sentinel());

    let mut servers = three_servers();
    for s in &mut servers {
        s.enabled = false;
    }
    engine.apply_config(&config("RoundRobin", servers));
    for _ in 0..5 {
        let s = engine.resolve(&ResolveRequest::new(PORT).destination("x").sticky(true));
        assert!(s.is_sentinel());
        assert_eq!(s.host, "invalid");
    }
}

#[test]
fn test_round_robin_visits_each_once() {
    let engine = RoutingEngine::from_config(&config("RoundRobin", three_servers()));
    let seen: HashSet<String> = (0..3)
        .map(|_| engine.resolve(&ResolveRequest::new(PORT)).id.clone())
        .collect();
    assert_eq!(seen.len(), 3);
}

#[test]
fn test_sticky_until_ttl_or_error() {
    let engine = RoutingEngine::from_config(&config("RoundRobin", three_servers()));
    let t0 = Instant::now();
    let req = ResolveRequest::new(PORT).destination("example.com:443").sticky(true);

    let first = engine.resolve_at(&req, t0);
    assert_eq!(engine.resolve_at(&req, t0 + Duration::from_secs(10)).id, first.id);

    // Re-established, then expired
    let second = engine.resolve_at(&req, t0 + Duration::from_secs(11));
    let later = engine.resolve_at(&req, t0 + Duration::from_secs(11 + 181));
    assert_ne!(later.id, second.id);

    // Re-established, then broken by an error
    let third = engine.resolve_at(&req, t0 + Duration::from_secs(400));
    fail(&third, 1);
    assert_ne!(engine.resolve_at(&req, t0 + Duration::from_secs(401)).id, third.id);
}

#[test]
fn test_low_exception_example() {
    let mut servers = vec![
        server("A", "10.0.0.1", ""),
        server("B", "10.0.0.2", ""),
        server("C", "10.0.0.3", ""),
    ];
    servers[2].enabled = false;
    let engine = RoutingEngine::from_config(&config("LowException", servers));
    fail(&engine.registry().get("B").unwrap(), 3);

    for _ in 0..5 {
        assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "A");
    }
}

#[test]
fn test_low_exception_prefers_clean_streak() {
    let engine = RoutingEngine::from_config(&config("LowException", three_servers()));
    fail(&engine.registry().get("a").unwrap(), 1);
    fail(&engine.registry().get("b").unwrap(), 2);
    assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "c");
}

#[test]
fn test_group_rule_overrides_algorithm() {
    for algorithm in ["RoundRobin", "Random", "LowException", "SelectedFirst"] {
        let mut cfg = config(algorithm, vec![server("A", "10.0.0.1", "g1")]);
        cfg.port_map = vec![rule(1090, "g1", PortMapMode::RuleProxy)];
        let engine = RoutingEngine::from_config(&cfg);
        assert_eq!(engine.resolve(&ResolveRequest::new(1090).destination("d")).id, "A");
    }
}

#[test]
fn test_forced_random_example() {
    let engine = RoutingEngine::from_config(&config("LowException", vec![server("A", "h", "")]));
    fail(&engine.registry().get("A").unwrap(), 5);

    let req = ResolveRequest::new(PORT).destination("d").sticky(true);
    assert_eq!(engine.resolve(&req.forced()).id, "A");
    assert_eq!(engine.affinity_len(PORT), 0);
}

#[test]
fn test_pinned_server_from_config() {
    let cfg = parse_config(
        r#"
        [balance]
        algorithm = "SelectedFirst"
        random = false
        index = 2

        [[servers]]
        id = "a"
        host = "10.0.0.1"

        [[servers]]
        id = "b"
        host = "10.0.0.2"

        [[servers]]
        id = "c"
        host = "10.0.0.3"
        enabled = false
        "#,
    )
    .unwrap();
    let engine = RoutingEngine::from_config(&cfg);
    // Pinned server disabled: scan forward, wrapping
    assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).id, "a");
}

#[test]
fn test_reload_keeps_health_and_drops_stale_rules() {
    let mut cfg = config("RoundRobin", three_servers());
    cfg.port_map = vec![rule(1090, "c", PortMapMode::ForceProxy)];
    let engine = RoutingEngine::from_config(&cfg);
    fail(&engine.registry().get("a").unwrap(), 2);
    assert_eq!(engine.resolve(&ResolveRequest::new(1090)).id, "c");

    cfg.servers.truncate(2);
    engine.apply_config(&cfg);
    assert_eq!(engine.registry().get("a").unwrap().health().continuous_errors(), 2);
    assert!(engine.lookup(1090).is_none());
    assert!(!engine.resolve(&ResolveRequest::new(1090)).is_sentinel());
}

#[test]
fn test_forward_rule_lookup() {
    let cfg = parse_config(
        r#"
        [[port_map]]
        port = 2222
        mode = "forward"
        server_addr = "192.168.1.5"
        server_port = 22
        "#,
    )
    .unwrap();
    let engine = RoutingEngine::from_config(&cfg);
    let route = engine.lookup(2222).unwrap();
    assert_eq!(route.mode, PortMapMode::Forward);
    assert_eq!(route.destination.as_deref(), Some("192.168.1.5:22"));

    let target = engine.resolve(&ResolveRequest::new(2222));
    assert_eq!((target.host.as_str(), target.port), ("192.168.1.5", 22));
}

#[test]
fn test_random_in_group_stays_in_reference_group() {
    let mut cfg = config("Random", three_servers());
    cfg.balance.random_in_group = true;
    cfg.balance.index = 2;
    let engine = RoutingEngine::from_config(&cfg);
    for _ in 0..20 {
        assert_eq!(engine.resolve(&ResolveRequest::new(PORT)).group, "g2");
    }
}

const ID_LESS: &str = r#"
    [[servers]]
    host = "10.0.0.1"
    port = 8388

    [[servers]]
    host = "10.0.0.2"
    port = 8388
    remarks = "backup"
"#;

#[test]
fn test_reload_keeps_health_for_servers_without_id() {
    let engine = RoutingEngine::from_config(&parse_config(ID_LESS).unwrap());
    let before = engine.registry().list()[0].clone();
    fail(&before, 4);

    engine.apply_config(&parse_config(ID_LESS).unwrap());
    let after = engine.registry().list()[0].clone();
    assert_eq!(after.id, before.id);
    assert_eq!(after.health().continuous_errors(), 4);
}

#[test]
fn test_reload_reapplies_configured_overrides() {
    let mut cfg = config("RoundRobin", three_servers());
    cfg.balance.index = 1;
    let engine = RoutingEngine::from_config(&cfg);

    engine.registry().set_enabled("a", false);
    assert!(engine.pin(2));

    engine.apply_config(&cfg);
    assert!(engine.registry().get("a").unwrap().enabled);
    assert_eq!(engine.settings().pinned_index, Some(1));
}
