//! Selection methods for the balancing algorithms

use super::BalancingAlgorithm;
use crate::core::backend::Backend;
use crate::utils::error::{Result, RollgateError};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Select one backend from an ordered healthy slice.
///
/// Fails with `NoHealthyBackends` when the slice is empty.
pub fn select_from(
    backends: &[Arc<Backend>],
    algorithm: BalancingAlgorithm,
    client_key: Option<&str>,
    cursor: &AtomicUsize,
) -> Result<Arc<Backend>> {
    if backends.is_empty() {
        return Err(RollgateError::NoHealthyBackends);
    }

    match algorithm {
        BalancingAlgorithm::RoundRobin => Ok(round_robin(backends, cursor)),
        BalancingAlgorithm::LeastConnections => Ok(least_connections(backends)),
        BalancingAlgorithm::IpHash => Ok(ip_hash(backends, client_key.unwrap_or_default())),
        BalancingAlgorithm::WeightedRoundRobin => Ok(weighted(backends, cursor)),
    }
}

/// Cursor modulo the current set size. The cursor only ever advances, so
/// set growth or shrinkage does not restart the rotation.
fn round_robin(backends: &[Arc<Backend>], cursor: &AtomicUsize) -> Arc<Backend> {
    let index = cursor.fetch_add(1, Ordering::Relaxed) % backends.len();
    debug!(backend = %backends[index].id, index, "round-robin selection");
    backends[index].clone()
}

/// Minimum active connections; a strict less-than keeps the first
/// encountered backend on ties.
fn least_connections(backends: &[Arc<Backend>]) -> Arc<Backend> {
    let mut best = &backends[0];
    let mut best_active = best.active_connections();

    for backend in &backends[1..] {
        let active = backend.active_connections();
        if active < best_active {
            best_active = active;
            best = backend;
        }
    }

    debug!(backend = %best.id, active = best_active, "least-connections selection");
    best.clone()
}

/// Deterministic hash of the client key modulo the set size. Affinity
/// holds while the healthy set is stable and is allowed to break when
/// membership changes.
fn ip_hash(backends: &[Arc<Backend>], client_key: &str) -> Arc<Backend> {
    let mut hasher = ahash::AHasher::default();
    client_key.hash(&mut hasher);
    let index = (hasher.finish() % backends.len() as u64) as usize;
    debug!(backend = %backends[index].id, key = %client_key, "ip-hash selection");
    backends[index].clone()
}

/// Uniform draw in `[0, total_weight)`, walking backends and accumulating
/// weight until the draw falls inside a backend's interval.
fn weighted(backends: &[Arc<Backend>], cursor: &AtomicUsize) -> Arc<Backend> {
    let total: u64 = backends.iter().map(|b| u64::from(b.weight)).sum();
    if total == 0 {
        return round_robin(backends, cursor);
    }

    use rand::Rng;
    let draw = rand::thread_rng().gen_range(0..total);

    let mut accumulated = 0u64;
    for backend in backends {
        accumulated += u64::from(backend.weight);
        if draw < accumulated {
            debug!(backend = %backend.id, weight = backend.weight, "weighted selection");
            return backend.clone();
        }
    }

    // Unreachable given the accumulation above
    backends[backends.len() - 1].clone()
}
