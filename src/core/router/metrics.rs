//! Traffic metrics collection and reporting

use crate::core::backend::{BackendRegistry, BackendSnapshot};
use serde::Serialize;

/// Aggregate and per-backend traffic metrics
#[derive(Debug, Clone, Serialize)]
pub struct RouterMetrics {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub active_connections: u64,
    pub healthy_backends: usize,
    pub total_backends: usize,
    pub backends: Vec<BackendSnapshot>,
}

/// Build a metrics view from the registry's current counters
pub(crate) fn collect(registry: &BackendRegistry) -> RouterMetrics {
    let snapshot = registry.snapshot();

    let mut total_requests = 0u64;
    let mut failed_requests = 0u64;
    let mut active_connections = 0u64;
    for backend in &snapshot.backends {
        total_requests += backend.total_requests;
        failed_requests += backend.failed_requests;
        active_connections += u64::from(backend.active_connections);
    }

    RouterMetrics {
        total_requests,
        failed_requests,
        active_connections,
        healthy_backends: snapshot.healthy_ids.len(),
        total_backends: snapshot.backends.len(),
        backends: snapshot.backends,
    }
}
