//! Backend registry
//!
//! Single source of truth for the set of known backends and their health
//! partition. Every registered id is in exactly one of the healthy or
//! failed sets at all times. The registry also owns the round-robin
//! cursor, which is monotonic and never reset, so membership churn does
//! not skew selection.

use super::{Backend, BackendId, BackendSnapshot, BackendSpec};
use crate::core::balancer::{self, BalancingAlgorithm};
use crate::core::events::{Event, EventBus};
use crate::utils::error::{Result, RollgateError};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tracing::{debug, info};

/// Registry of backends with derived healthy/failed sets
pub struct BackendRegistry {
    inner: RwLock<RegistryInner>,
    cursor: AtomicUsize,
    events: Arc<EventBus>,
}

#[derive(Default)]
struct RegistryInner {
    backends: HashMap<BackendId, Arc<Backend>>,
    /// Stable insertion order, used by round-robin iteration
    order: Vec<BackendId>,
    healthy: HashSet<BackendId>,
    failed: HashSet<BackendId>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            cursor: AtomicUsize::new(0),
            events,
        }
    }

    /// Register a new backend; it starts in the healthy set.
    ///
    /// Fails with `DuplicateBackend` if the id is already present.
    pub fn add_backend(&self, spec: BackendSpec) -> Result<Arc<Backend>> {
        let backend = Arc::new(Backend::from_spec(spec)?);
        let id = backend.id.clone();

        {
            let mut inner = self.inner.write();
            if inner.backends.contains_key(&id) {
                return Err(RollgateError::DuplicateBackend(id));
            }
            inner.backends.insert(id.clone(), backend.clone());
            inner.order.push(id.clone());
            inner.healthy.insert(id.clone());
        }

        info!(backend = %id, host = %backend.host, port = backend.port, "backend registered");
        self.events.emit(Event::BackendAdded { id });
        Ok(backend)
    }

    /// Remove a backend and its derived-set membership.
    ///
    /// A second removal of the same id fails with `NotFound`.
    pub fn remove_backend(&self, id: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if inner.backends.remove(id).is_none() {
                return Err(RollgateError::NotFound(format!("backend {id}")));
            }
            inner.order.retain(|b| b != id);
            inner.healthy.remove(id);
            inner.failed.remove(id);
        }

        info!(backend = %id, "backend removed");
        self.events.emit(Event::BackendRemoved { id: id.to_string() });
        Ok(())
    }

    /// Move a backend into the healthy set.
    ///
    /// No-op if it is already healthy, so repeated transitions do not emit
    /// duplicate events or restamp the check time.
    pub fn mark_healthy(&self, id: &str) -> Result<()> {
        let backend = {
            let mut inner = self.inner.write();
            let backend = inner
                .backends
                .get(id)
                .cloned()
                .ok_or_else(|| RollgateError::NotFound(format!("backend {id}")))?;
            if inner.healthy.contains(id) {
                return Ok(());
            }
            inner.failed.remove(id);
            inner.healthy.insert(id.to_string());
            backend
        };

        backend.set_healthy(true);
        debug!(backend = %id, "backend marked healthy");
        self.events.emit(Event::BackendHealthChanged {
            id: id.to_string(),
            healthy: true,
        });
        Ok(())
    }

    /// Move a backend into the failed set. No-op if already failed.
    pub fn mark_failed(&self, id: &str) -> Result<()> {
        let backend = {
            let mut inner = self.inner.write();
            let backend = inner
                .backends
                .get(id)
                .cloned()
                .ok_or_else(|| RollgateError::NotFound(format!("backend {id}")))?;
            if inner.failed.contains(id) {
                return Ok(());
            }
            inner.healthy.remove(id);
            inner.failed.insert(id.to_string());
            backend
        };

        backend.set_healthy(false);
        info!(backend = %id, "backend marked failed");
        self.events.emit(Event::BackendHealthChanged {
            id: id.to_string(),
            healthy: false,
        });
        Ok(())
    }

    /// Look up a backend by id
    pub fn get(&self, id: &str) -> Option<Arc<Backend>> {
        self.inner.read().backends.get(id).cloned()
    }

    /// All backends in insertion order
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.backends.get(id).cloned())
            .collect()
    }

    /// Healthy backends in insertion order
    pub fn healthy_backends(&self) -> Vec<Arc<Backend>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|id| inner.healthy.contains(*id))
            .filter_map(|id| inner.backends.get(id).cloned())
            .collect()
    }

    /// Ids of backends labeled with the given service, in insertion order
    pub fn backends_for_service(&self, service: &str) -> Vec<BackendId> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .backends
                    .get(*id)
                    .is_some_and(|b| b.service.as_deref() == Some(service))
            })
            .cloned()
            .collect()
    }

    /// Number of registered backends
    pub fn len(&self) -> usize {
        self.inner.read().backends.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().backends.is_empty()
    }

    /// Select one healthy backend with the given algorithm.
    ///
    /// Pure read apart from the round-robin cursor advance; fails with
    /// `NoHealthyBackends` when the healthy set is empty.
    pub fn select_backend(
        &self,
        algorithm: BalancingAlgorithm,
        client_key: Option<&str>,
    ) -> Result<Arc<Backend>> {
        let healthy = self.healthy_backends();
        balancer::select_from(&healthy, algorithm, client_key, &self.cursor)
    }

    /// The shared round-robin cursor
    pub(crate) fn cursor(&self) -> &AtomicUsize {
        &self.cursor
    }

    /// Serializable snapshot of the registry and its health partition
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read();
        let backends = inner
            .order
            .iter()
            .filter_map(|id| inner.backends.get(id))
            .map(|b| b.snapshot())
            .collect();
        let mut healthy_ids: Vec<_> = inner.healthy.iter().cloned().collect();
        let mut failed_ids: Vec<_> = inner.failed.iter().cloned().collect();
        healthy_ids.sort();
        failed_ids.sort();
        RegistrySnapshot {
            backends,
            healthy_ids,
            failed_ids,
        }
    }
}

/// Point-in-time view of the registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub backends: Vec<BackendSnapshot>,
    pub healthy_ids: Vec<BackendId>,
    pub failed_ids: Vec<BackendId>,
}
