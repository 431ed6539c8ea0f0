use super::*;
use crate::core::backend::{Backend, BackendRegistry, BackendSpec};
use crate::core::events::EventBus;
use crate::utils::error::RollgateError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

fn backend(id: &str, weight: u32) -> Arc<Backend> {
    Arc::new(
        Backend::from_spec(BackendSpec::new(id, "10.0.0.1", 8080).with_weight(weight)).unwrap(),
    )
}

fn pool(ids: &[&str]) -> Vec<Arc<Backend>> {
    ids.iter().map(|id| backend(id, 1)).collect()
}

#[test]
fn empty_set_yields_no_healthy_backends() {
    let cursor = AtomicUsize::new(0);
    for algorithm in [
        BalancingAlgorithm::RoundRobin,
        BalancingAlgorithm::LeastConnections,
        BalancingAlgorithm::IpHash,
        BalancingAlgorithm::WeightedRoundRobin,
    ] {
        let err = select_from(&[], algorithm, Some("client"), &cursor).unwrap_err();
        assert!(matches!(err, RollgateError::NoHealthyBackends));
    }
}

#[test]
fn round_robin_cycles_in_order() {
    let backends = pool(&["a", "b", "c"]);
    let cursor = AtomicUsize::new(0);

    let picks: Vec<_> = (0..6)
        .map(|_| {
            select_from(&backends, BalancingAlgorithm::RoundRobin, None, &cursor)
                .unwrap()
                .id
                .clone()
        })
        .collect();
    assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn round_robin_cursor_survives_membership_change() {
    let backends = pool(&["a", "b", "c"]);
    let cursor = AtomicUsize::new(0);

    for _ in 0..4 {
        select_from(&backends, BalancingAlgorithm::RoundRobin, None, &cursor).unwrap();
    }

    // Set shrinks; the cursor keeps advancing rather than restarting
    let smaller = pool(&["a", "b"]);
    let pick = select_from(&smaller, BalancingAlgorithm::RoundRobin, None, &cursor).unwrap();
    assert_eq!(pick.id, "a"); // cursor 4 % 2
    let pick = select_from(&smaller, BalancingAlgorithm::RoundRobin, None, &cursor).unwrap();
    assert_eq!(pick.id, "b");
}

#[test]
fn least_connections_prefers_idle_backend() {
    let backends = pool(&["a", "b", "c"]);
    backends[0].begin_request();
    backends[0].begin_request();
    backends[2].begin_request();

    let cursor = AtomicUsize::new(0);
    let pick =
        select_from(&backends, BalancingAlgorithm::LeastConnections, None, &cursor).unwrap();
    assert_eq!(pick.id, "b");
}

#[test]
fn least_connections_tie_keeps_first() {
    let backends = pool(&["a", "b", "c"]);
    let cursor = AtomicUsize::new(0);
    let pick =
        select_from(&backends, BalancingAlgorithm::LeastConnections, None, &cursor).unwrap();
    assert_eq!(pick.id, "a");
}

#[test]
fn ip_hash_is_deterministic_per_key() {
    let backends = pool(&["a", "b", "c", "d"]);
    let cursor = AtomicUsize::new(0);

    let first = select_from(
        &backends,
        BalancingAlgorithm::IpHash,
        Some("203.0.113.7"),
        &cursor,
    )
    .unwrap();
    for _ in 0..20 {
        let again = select_from(
            &backends,
            BalancingAlgorithm::IpHash,
            Some("203.0.113.7"),
            &cursor,
        )
        .unwrap();
        assert_eq!(again.id, first.id);
    }
}

#[test]
fn weighted_draws_roughly_match_weights() {
    let backends = vec![backend("light", 1), backend("heavy", 3)];
    let cursor = AtomicUsize::new(0);

    let mut counts: HashMap<String, u32> = HashMap::new();
    for _ in 0..10_000 {
        let pick = select_from(
            &backends,
            BalancingAlgorithm::WeightedRoundRobin,
            None,
            &cursor,
        )
        .unwrap();
        *counts.entry(pick.id.clone()).or_default() += 1;
    }

    let heavy = counts["heavy"] as f64 / 10_000.0;
    // Expected 0.75; generous band to keep the test stable
    assert!(heavy > 0.70 && heavy < 0.80, "heavy share was {heavy}");
}

#[test]
fn failed_backend_never_selected() {
    let events = Arc::new(EventBus::default());
    let registry = BackendRegistry::new(events);
    registry
        .add_backend(BackendSpec::new("a", "10.0.0.1", 8080))
        .unwrap();
    registry
        .add_backend(BackendSpec::new("b", "10.0.0.2", 8080))
        .unwrap();
    registry.mark_failed("b").unwrap();

    for _ in 0..100 {
        let pick = registry
            .select_backend(BalancingAlgorithm::RoundRobin, None)
            .unwrap();
        assert_eq!(pick.id, "a");
    }
}
