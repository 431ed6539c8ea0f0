//! Health monitor implementation
//!
//! Runs a recurring probe cycle. Probes for distinct backends are
//! independent futures joined per cycle, so one slow or failing backend
//! never blocks the others. A probe that exceeds the per-probe timeout
//! counts as a failure for that cycle.

use crate::core::backend::{BackendId, BackendRegistry};
use crate::core::backend::Backend;
use crate::core::traits::HealthProbe;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Health monitor configuration
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between probe cycles
    pub check_interval: Duration,
    /// Timeout for an individual probe; exceeding it counts as a failure
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Probes registered backends and moves them between the healthy and
/// failed sets
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    registry: Arc<BackendRegistry>,
    probe: Arc<dyn HealthProbe>,
    /// Consecutive probe failures per backend
    fail_counts: DashMap<BackendId, u32>,
    /// Failed backends are not re-probed until this instant
    cooldowns: DashMap<BackendId, Instant>,
}

impl HealthMonitor {
    /// Create a monitor over the given registry and probe collaborator
    pub fn new(
        config: HealthMonitorConfig,
        registry: Arc<BackendRegistry>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            config,
            registry,
            probe,
            fail_counts: DashMap::new(),
            cooldowns: DashMap::new(),
        }
    }

    /// Spawn the recurring monitoring loop
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            "starting health monitor"
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_cycle().await;
            }
        })
    }

    /// Run one probe cycle over every registered backend.
    ///
    /// Public so callers with their own scheduling can drive cycles
    /// directly.
    pub async fn run_cycle(&self) {
        let backends = self.registry.all_backends();
        if backends.is_empty() {
            return;
        }

        let probes = backends.iter().map(|b| self.probe_backend(b.clone()));
        futures::future::join_all(probes).await;

        // Drop tracking state for backends that were removed mid-cycle
        self.fail_counts.retain(|id, _| self.registry.get(id).is_some());
        self.cooldowns.retain(|id, _| self.registry.get(id).is_some());
    }

    async fn probe_backend(&self, backend: Arc<Backend>) {
        if let Some(until) = self.cooldowns.get(&backend.id).map(|e| *e.value()) {
            if Instant::now() < until {
                debug!(backend = %backend.id, "skipping probe, still in fail timeout");
                return;
            }
        }

        let outcome = tokio::time::timeout(
            self.config.probe_timeout,
            self.probe
                .probe(&backend.host, backend.port, &backend.health_path),
        )
        .await;

        match outcome {
            Ok(Ok(true)) => {
                self.fail_counts.remove(&backend.id);
                self.cooldowns.remove(&backend.id);
                // Backend may have been removed concurrently; nothing to do then
                let _ = self.registry.mark_healthy(&backend.id);
            }
            Ok(Ok(false)) => {
                debug!(backend = %backend.id, "probe reported unhealthy");
                self.record_failure(&backend);
            }
            Ok(Err(e)) => {
                debug!(backend = %backend.id, error = %e, "probe error");
                self.record_failure(&backend);
            }
            Err(_) => {
                debug!(backend = %backend.id, "probe timed out");
                self.record_failure(&backend);
            }
        }
    }

    fn record_failure(&self, backend: &Backend) {
        let failures = {
            let mut entry = self.fail_counts.entry(backend.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if failures >= backend.max_fails {
            warn!(
                backend = %backend.id,
                failures,
                timeout_secs = backend.fail_timeout.as_secs(),
                "failure threshold reached, excluding backend"
            );
            let _ = self.registry.mark_failed(&backend.id);
            self.cooldowns
                .insert(backend.id.clone(), Instant::now() + backend.fail_timeout);
            // Counting restarts once the backend becomes probe-eligible again
            self.fail_counts.remove(&backend.id);
        }
    }
}
