//! Traffic router implementation

use super::metrics::{self, RouterMetrics};
use crate::core::backend::{Backend, BackendId, BackendRegistry};
use crate::core::balancer::{self, BalancingAlgorithm};
use crate::core::events::{Event, EventBus};
use crate::utils::error::{Result, RollgateError};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Selection algorithm for the healthy set
    pub algorithm: BalancingAlgorithm,
    /// Poll interval for cooperative connection draining
    pub drain_poll_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            algorithm: BalancingAlgorithm::RoundRobin,
            drain_poll_interval: Duration::from_millis(50),
        }
    }
}

/// Canary traffic split for one service
#[derive(Debug, Clone, Serialize)]
pub struct TrafficSplit {
    /// Backends of the current stable version
    pub stable: Vec<BackendId>,
    /// Backends of the candidate (canary) version
    pub candidate: Vec<BackendId>,
    /// Percentage of traffic routed to the candidate side
    pub candidate_percent: u8,
}

/// Routing context for one request
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteRequest<'a> {
    /// Service the request targets; `None` routes over all backends
    pub service: Option<&'a str>,
    /// Client key for ip-hash affinity
    pub client_key: Option<&'a str>,
}

impl<'a> RouteRequest<'a> {
    /// Request scoped to a service
    pub fn for_service(service: &'a str) -> Self {
        Self {
            service: Some(service),
            client_key: None,
        }
    }
}

/// Outcome of dispatching one request
#[derive(Debug)]
pub enum Dispatch<T, E> {
    /// No healthy backend was available; nothing was mutated
    Unavailable,
    /// A backend handled (or failed to handle) the request
    Handled {
        backend_id: BackendId,
        elapsed_ms: u64,
        result: std::result::Result<T, E>,
    },
}

impl<T, E> Dispatch<T, E> {
    /// Whether the request reached a backend
    pub fn is_handled(&self) -> bool {
        matches!(self, Dispatch::Handled { .. })
    }
}

/// The request-handling path plus deployment-driven routing state
pub struct TrafficRouter {
    config: RouterConfig,
    registry: Arc<BackendRegistry>,
    /// Pinned active pool per service (blue-green switching)
    pools: RwLock<HashMap<String, Vec<BackendId>>>,
    /// Canary split per service; takes precedence over the pinned pool
    splits: RwLock<HashMap<String, TrafficSplit>>,
    backup_pool: RwLock<Vec<BackendId>>,
    failover_active: AtomicBool,
    events: Arc<EventBus>,
}

impl TrafficRouter {
    /// Create a router over the given registry
    pub fn new(config: RouterConfig, registry: Arc<BackendRegistry>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            registry,
            pools: RwLock::new(HashMap::new()),
            splits: RwLock::new(HashMap::new()),
            backup_pool: RwLock::new(Vec::new()),
            failover_active: AtomicBool::new(false),
            events,
        }
    }

    /// Select a backend for the request without dispatching it
    pub fn select(&self, request: RouteRequest<'_>) -> Result<Arc<Backend>> {
        let eligible = self.eligible_backends(request.service);
        balancer::select_from(
            &eligible,
            self.config.algorithm,
            request.client_key,
            self.registry.cursor(),
        )
    }

    /// Route a request to a backend and run the forward step against it.
    ///
    /// `NoHealthyBackends` is recovered into `Dispatch::Unavailable` with no
    /// side effects. On success the chosen backend's connection is held for
    /// the duration of the forward future and released even if it errors.
    pub async fn dispatch<T, E, F, Fut>(
        &self,
        request: RouteRequest<'_>,
        forward: F,
    ) -> Dispatch<T, E>
    where
        F: FnOnce(Arc<Backend>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let backend = match self.select(request) {
            Ok(backend) => backend,
            Err(_) => {
                debug!("no healthy backend available, rejecting request");
                return Dispatch::Unavailable;
            }
        };

        // Released on drop, including when the forward future errors
        let _guard = ConnectionGuard::acquire(backend.clone());

        let start = Instant::now();
        let result = forward(backend.clone()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        backend.record_response(elapsed_ms, result.is_ok());
        if let Err(e) = &result {
            // Health transitions are the monitor's job; a request failure
            // only feeds the counters
            debug!(backend = %backend.id, error = %e, "forward failed");
        }

        Dispatch::Handled {
            backend_id: backend.id.clone(),
            elapsed_ms,
            result,
        }
    }

    /// Pin the active pool for a service
    pub fn set_pool(&self, service: &str, backends: Vec<BackendId>) {
        info!(service = %service, pool_size = backends.len(), "active pool updated");
        self.pools.write().insert(service.to_string(), backends);
    }

    /// Drop the pinned pool for a service
    pub fn clear_pool(&self, service: &str) {
        self.pools.write().remove(service);
    }

    /// The pinned pool for a service, if any
    pub fn pool(&self, service: &str) -> Option<Vec<BackendId>> {
        self.pools.read().get(service).cloned()
    }

    /// Install a canary traffic split for a service
    pub fn set_traffic_split(&self, service: &str, split: TrafficSplit) {
        info!(
            service = %service,
            candidate_percent = split.candidate_percent,
            "traffic split updated"
        );
        self.splits.write().insert(service.to_string(), split);
    }

    /// Remove the traffic split for a service
    pub fn clear_traffic_split(&self, service: &str) {
        self.splits.write().remove(service);
    }

    /// The current traffic split for a service, if any
    pub fn traffic_split(&self, service: &str) -> Option<TrafficSplit> {
        self.splits.read().get(service).cloned()
    }

    /// Designate the backup pool used by failover
    pub fn set_backup_pool(&self, backends: Vec<BackendId>) {
        *self.backup_pool.write() = backends;
    }

    /// Switch routing to the designated backup pool
    pub fn initiate_failover(&self) {
        warn!("failover initiated, switching to backup pool");
        self.failover_active.store(true, Ordering::Relaxed);
        self.events.emit(Event::FailoverInitiated);
    }

    /// Return routing to the regular pools
    pub fn clear_failover(&self) {
        self.failover_active.store(false, Ordering::Relaxed);
    }

    /// Wait until a backend has no active connections or `max_wait`
    /// elapses, then proceed regardless
    pub async fn drain_connections(&self, id: &str, max_wait: Duration) -> Result<()> {
        let backend = self
            .registry
            .get(id)
            .ok_or_else(|| RollgateError::NotFound(format!("backend {id}")))?;

        let deadline = Instant::now() + max_wait;
        while backend.active_connections() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    backend = %id,
                    remaining = backend.active_connections(),
                    "drain window elapsed with connections still active"
                );
                break;
            }
            tokio::time::sleep(self.config.drain_poll_interval).await;
        }
        debug!(backend = %id, "drain finished");
        Ok(())
    }

    /// Aggregate and per-backend traffic metrics
    pub fn get_metrics(&self) -> RouterMetrics {
        metrics::collect(&self.registry)
    }

    /// Healthy backends eligible for the given service, honoring failover,
    /// splits and pinned pools in that order
    fn eligible_backends(&self, service: Option<&str>) -> Vec<Arc<Backend>> {
        let healthy = self.registry.healthy_backends();

        if self.failover_active.load(Ordering::Relaxed) {
            let backup = self.backup_pool.read();
            return healthy
                .into_iter()
                .filter(|b| backup.contains(&b.id))
                .collect();
        }

        let Some(service) = service else {
            return healthy;
        };

        if let Some(split) = self.splits.read().get(service) {
            let side = choose_split_side(split);
            let chosen: Vec<_> = healthy
                .iter()
                .filter(|b| side.contains(&b.id))
                .cloned()
                .collect();
            if !chosen.is_empty() {
                return chosen;
            }
            // Chosen side fully unhealthy; fall back to any split member
            return healthy
                .into_iter()
                .filter(|b| split.stable.contains(&b.id) || split.candidate.contains(&b.id))
                .collect();
        }

        if let Some(pool) = self.pools.read().get(service) {
            return healthy
                .into_iter()
                .filter(|b| pool.contains(&b.id))
                .collect();
        }

        let labeled: Vec<_> = healthy
            .iter()
            .filter(|b| b.service.as_deref() == Some(service))
            .cloned()
            .collect();
        if labeled.is_empty() { healthy } else { labeled }
    }
}

/// Pick the stable or candidate side of a split by weighted coin flip
fn choose_split_side(split: &TrafficSplit) -> &[BackendId] {
    if split.candidate_percent >= 100 {
        return &split.candidate;
    }
    if split.candidate_percent == 0 {
        return &split.stable;
    }
    use rand::Rng;
    if rand::thread_rng().gen_range(0..100u8) < split.candidate_percent {
        &split.candidate
    } else {
        &split.stable
    }
}

/// Holds one active connection on a backend; released on drop so the
/// decrement happens even when forwarding errors or the future is dropped
struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    fn acquire(backend: Arc<Backend>) -> Self {
        backend.begin_request();
        Self { backend }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.release_connection();
    }
}
