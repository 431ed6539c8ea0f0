//! Deployment orchestrator
//!
//! Owns the deployment state machine
//! (`pending -> running -> {completed | failed | cancelled}`), enforces
//! single-flight per service, and drives strategy execution in a spawned
//! task. The orchestrator never mutates backend state directly; it goes
//! through the registry and traffic router, which preserve their own
//! invariants during deployment-driven churn.

use super::rollback::{RollbackContext, RollbackEvent, RollbackManager};
use super::types::{
    DeployStrategy, Deployment, DeploymentSpec, DeploymentStatus, PhaseRecord, RollbackThresholds,
};
use crate::core::backend::BackendRegistry;
use crate::core::events::{Event, EventBus};
use crate::core::router::TrafficRouter;
use crate::core::traits::{HealthProbe, MetricsSource, Provisioner};
use crate::utils::error::{Result, RollgateError};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Canary traffic percentages, applied in order
    pub canary_ramp: Vec<u8>,
    /// Default rollback thresholds; a spec may override them
    pub thresholds: RollbackThresholds,
    /// Length of each monitoring window
    pub monitor_window: Duration,
    /// Metrics poll sub-interval inside a monitoring window
    pub monitor_poll_interval: Duration,
    /// Probe attempts while waiting for new instances to pass
    pub health_check_attempts: u32,
    /// Delay between those attempts
    pub health_check_interval: Duration,
    /// Max wait when draining a backend before removal
    pub drain_wait: Duration,
    /// Rollback events kept in history
    pub rollback_retention: usize,
    /// Running deployments older than this are reported as stuck;
    /// informational only, never auto-failed
    pub stuck_threshold: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            canary_ramp: vec![5, 10, 25, 50, 100],
            thresholds: RollbackThresholds::default(),
            monitor_window: Duration::from_secs(60),
            monitor_poll_interval: Duration::from_secs(30),
            health_check_attempts: 10,
            health_check_interval: Duration::from_secs(2),
            drain_wait: Duration::from_secs(30),
            rollback_retention: 50,
            stuck_threshold: Duration::from_secs(1800),
        }
    }
}

/// Full engine snapshot for persistence and recovery
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub registry: crate::core::backend::RegistrySnapshot,
    pub deployments: Vec<Deployment>,
    pub rollback_history: Vec<RollbackEvent>,
    /// Running deployments past the stuck threshold
    pub stuck_deployments: Vec<String>,
}

/// Runs one deployment strategy at a time per service
pub struct DeploymentOrchestrator {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: Arc<BackendRegistry>,
    pub(crate) router: Arc<TrafficRouter>,
    pub(crate) provisioner: Arc<dyn Provisioner>,
    pub(crate) probe: Arc<dyn HealthProbe>,
    pub(crate) metrics: Arc<dyn MetricsSource>,
    rollbacks: RollbackManager,
    deployments: DashMap<String, Deployment>,
    /// Service name -> running deployment id; the single-flight slot
    in_flight: DashMap<String, String>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
    status_channels: DashMap<String, watch::Sender<DeploymentStatus>>,
    pub(crate) rollback_contexts: DashMap<String, RollbackContext>,
    events: Arc<EventBus>,
}

impl DeploymentOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<BackendRegistry>,
        router: Arc<TrafficRouter>,
        provisioner: Arc<dyn Provisioner>,
        probe: Arc<dyn HealthProbe>,
        metrics: Arc<dyn MetricsSource>,
        events: Arc<EventBus>,
    ) -> Self {
        let rollbacks = RollbackManager::new(
            router.clone(),
            registry.clone(),
            provisioner.clone(),
            events.clone(),
            config.rollback_retention,
        );
        Self {
            config,
            registry,
            router,
            provisioner,
            probe,
            metrics,
            rollbacks,
            deployments: DashMap::new(),
            in_flight: DashMap::new(),
            cancel_flags: DashMap::new(),
            status_channels: DashMap::new(),
            rollback_contexts: DashMap::new(),
            events,
        }
    }

    /// Submit a deployment. Validates the spec, reserves the per-service
    /// single-flight slot atomically and spawns strategy execution.
    ///
    /// Fails with `ConflictingDeployment` if the service already has a
    /// running deployment.
    pub fn deploy(self: &Arc<Self>, spec: DeploymentSpec) -> Result<String> {
        spec.validate()?;

        let deployment = Deployment::new(spec);
        let id = deployment.id.clone();
        let service = deployment.spec.service_name.clone();

        // Reserving the slot and admitting the deployment is one atomic
        // step; a concurrent submit for the same service loses here
        match self.in_flight.entry(service.clone()) {
            Entry::Occupied(active) => {
                return Err(RollgateError::ConflictingDeployment {
                    service,
                    active: active.get().clone(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
            }
        }

        let (status_tx, _) = watch::channel(DeploymentStatus::Pending);
        self.status_channels.insert(id.clone(), status_tx);
        self.cancel_flags
            .insert(id.clone(), Arc::new(AtomicBool::new(false)));
        self.deployments.insert(id.clone(), deployment);

        info!(deployment = %id, service = %service, "deployment submitted");
        self.events.emit(Event::DeploymentStarted {
            id: id.clone(),
            service,
        });

        let orchestrator = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            orchestrator.execute(task_id).await;
        });

        Ok(id)
    }

    /// Current record of a deployment
    pub fn get_deployment_status(&self, id: &str) -> Result<Deployment> {
        self.deployments
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| RollgateError::NotFound(format!("deployment {id}")))
    }

    /// Request cooperative cancellation; takes effect at the next phase or
    /// poll boundary. No effect on a terminal deployment.
    pub fn cancel_deployment(&self, id: &str) -> Result<()> {
        let deployment = self.get_deployment_status(id)?;
        if deployment.status.is_terminal() {
            return Ok(());
        }
        if let Some(flag) = self.cancel_flags.get(id) {
            flag.store(true, Ordering::Relaxed);
            info!(deployment = %id, "cancellation requested");
        }
        Ok(())
    }

    /// Most recent rollback events, newest first
    pub fn get_rollback_history(&self, limit: usize) -> Vec<RollbackEvent> {
        self.rollbacks.history(limit)
    }

    /// Full registry and deployment snapshot
    pub fn get_state(&self) -> StateSnapshot {
        let now = Utc::now();
        let stuck_ms = self.config.stuck_threshold.as_millis() as i64;
        let mut deployments: Vec<Deployment> =
            self.deployments.iter().map(|d| d.clone()).collect();
        deployments.sort_by(|a, b| a.started_at.cmp(&b.started_at));

        let stuck_deployments = deployments
            .iter()
            .filter(|d| {
                d.status == DeploymentStatus::Running
                    && (now - d.started_at).num_milliseconds() > stuck_ms
            })
            .map(|d| d.id.clone())
            .collect();

        StateSnapshot {
            registry: self.registry.snapshot(),
            deployments,
            rollback_history: self.rollbacks.history(self.config.rollback_retention),
            stuck_deployments,
        }
    }

    /// Wait until a deployment reaches a terminal status
    pub async fn wait_for_terminal(&self, id: &str) -> Result<DeploymentStatus> {
        let Some(mut rx) = self.status_channels.get(id).map(|tx| tx.subscribe()) else {
            // The channel is pruned once the deployment is terminal; the
            // record keeps the final status
            return self.get_deployment_status(id).map(|d| d.status);
        };

        loop {
            let status = *rx.borrow();
            if status.is_terminal() {
                return Ok(status);
            }
            if rx.changed().await.is_err() {
                return self.get_deployment_status(id).map(|d| d.status);
            }
        }
    }

    /// Drive one deployment through its strategy to a terminal state
    async fn execute(self: Arc<Self>, id: String) {
        let spec = {
            let Some(mut deployment) = self.deployments.get_mut(&id) else {
                return;
            };
            deployment.status = DeploymentStatus::Running;
            deployment.spec.clone()
        };
        self.notify_status(&id, DeploymentStatus::Running);

        let cancel = self
            .cancel_flags
            .get(&id)
            .map(|f| f.clone())
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));

        let outcome = match spec.strategy {
            DeployStrategy::BlueGreen => self.run_blue_green(&id, &spec, &cancel).await,
            DeployStrategy::Canary => self.run_canary(&id, &spec, &cancel).await,
            DeployStrategy::Rolling => self.run_rolling(&id, &spec, &cancel).await,
            DeployStrategy::Recreate => self.run_recreate(&id, &spec, &cancel).await,
        };

        match outcome {
            Ok(()) => {
                self.finish(&id, DeploymentStatus::Completed, None);
                self.release_slot(&spec.service_name, &id);
                info!(deployment = %id, service = %spec.service_name, "deployment completed");
                self.events.emit(Event::DeploymentCompleted { id: id.clone() });
            }
            Err(RollgateError::Cancelled) => {
                // Already-completed phases are not unwound
                self.finish(&id, DeploymentStatus::Cancelled, None);
                self.release_slot(&spec.service_name, &id);
                info!(deployment = %id, "deployment cancelled");
                self.events.emit(Event::DeploymentCancelled { id: id.clone() });
            }
            Err(cause) => {
                let reason = cause.to_string();
                error!(deployment = %id, error = %reason, "deployment failed");
                self.handle_failure(&id, &spec, reason).await;
            }
        }
    }

    /// Record the failure, roll back, and release the single-flight slot.
    ///
    /// Rollback runs synchronously before the failure is published as
    /// terminal, except that a rolling re-submission must wait for the
    /// slot to free, which serializes it behind the failed attempt.
    async fn handle_failure(self: &Arc<Self>, id: &str, spec: &DeploymentSpec, reason: String) {
        if let Some(mut deployment) = self.deployments.get_mut(id) {
            deployment.error = Some(reason.clone());
        }

        let context = self.rollback_contexts.remove(id).map(|(_, ctx)| ctx);

        match spec.strategy {
            DeployStrategy::Rolling => {
                self.finish(id, DeploymentStatus::Failed, Some(reason.clone()));
                self.release_slot(&spec.service_name, id);
                self.roll_back_rolling(id, spec, &reason);
            }
            _ => {
                let deployment = match self.get_deployment_status(id) {
                    Ok(d) => d,
                    Err(_) => return,
                };
                let context = context.unwrap_or(RollbackContext::Rolling);
                self.rollbacks.execute(&deployment, context, &reason).await;
                self.finish(id, DeploymentStatus::Failed, Some(reason.clone()));
                self.release_slot(&spec.service_name, id);
            }
        }

        self.events.emit(Event::DeploymentFailed {
            id: id.to_string(),
            error: reason,
        });
    }

    /// Rolling rollback: record the event, then re-submit the most recent
    /// previously completed spec for the service as a new deployment
    fn roll_back_rolling(self: &Arc<Self>, id: &str, spec: &DeploymentSpec, reason: &str) {
        let previous = self.last_completed_for(&spec.service_name);

        let error = if previous.is_none() {
            warn!(
                service = %spec.service_name,
                "no previous completed deployment to roll back to"
            );
            Some("no previous completed deployment for service".to_string())
        } else {
            None
        };

        self.rollbacks.record(RollbackEvent {
            deployment_id: id.to_string(),
            service_name: spec.service_name.clone(),
            original_version: spec.version.clone(),
            reason: reason.to_string(),
            error,
            timestamp: Utc::now(),
        });

        if let Some(previous) = previous {
            info!(
                service = %spec.service_name,
                version = %previous.spec.version,
                "re-submitting previous configuration"
            );
            match self.deploy(previous.spec.clone()) {
                Ok(new_id) => {
                    info!(deployment = %new_id, "rollback deployment submitted");
                }
                Err(e) => {
                    // Operator intervention required; no retry-of-rollback
                    warn!(error = %e, "rollback re-submission rejected");
                }
            }
        }
    }

    /// Most recent completed deployment for a service
    pub(crate) fn last_completed_for(&self, service: &str) -> Option<Deployment> {
        self.deployments
            .iter()
            .filter(|d| {
                d.spec.service_name == service && d.status == DeploymentStatus::Completed
            })
            .max_by_key(|d| d.finished_at)
            .map(|d| d.clone())
    }

    /// Append a phase record before executing the phase
    pub(crate) fn begin_phase(&self, id: &str, name: &str, description: &str) {
        info!(deployment = %id, phase = %name, "phase started");
        if let Some(mut deployment) = self.deployments.get_mut(id) {
            deployment.phases.push(PhaseRecord {
                name: name.to_string(),
                description: description.to_string(),
                started_at: Utc::now(),
            });
        }
        self.events.emit(Event::PhaseStarted {
            deployment_id: id.to_string(),
            phase: name.to_string(),
        });
    }

    /// Cooperative cancellation check at phase and poll boundaries
    pub(crate) fn check_cancelled(&self, cancel: &AtomicBool) -> Result<()> {
        if cancel.load(Ordering::Relaxed) {
            Err(RollgateError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Poll the metrics collaborator for a fixed window, evaluating the
    /// rollback thresholds at each sub-interval. Cancellation is observed
    /// at every poll boundary.
    pub(crate) async fn monitor_window(
        &self,
        phase: &str,
        target: &str,
        thresholds: &RollbackThresholds,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let deadline = Instant::now() + self.config.monitor_window;
        loop {
            self.check_cancelled(cancel)?;

            let snapshot = self
                .metrics
                .snapshot(target)
                .await
                .map_err(|e| RollgateError::phase(phase, e))?;

            if let Some(breach) = thresholds.breach(&snapshot) {
                return Err(RollgateError::phase(phase, breach));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(self.config.monitor_poll_interval)).await;
        }
    }

    /// Record the terminal status and drop the per-deployment tracking
    /// state; only the `Deployment` record remains queryable afterwards
    fn finish(&self, id: &str, status: DeploymentStatus, error: Option<String>) {
        if let Some(mut deployment) = self.deployments.get_mut(id) {
            deployment.status = status;
            deployment.finished_at = Some(Utc::now());
            deployment.success = status == DeploymentStatus::Completed;
            if error.is_some() {
                deployment.error = error;
            }
        }
        self.notify_status(id, status);
        self.cancel_flags.remove(id);
        self.status_channels.remove(id);
        self.rollback_contexts.remove(id);
    }

    fn notify_status(&self, id: &str, status: DeploymentStatus) {
        if let Some(tx) = self.status_channels.get(id) {
            let _ = tx.send(status);
        }
    }

    fn release_slot(&self, service: &str, id: &str) {
        self.in_flight.remove_if(service, |_, active| active == id);
    }

    #[cfg(test)]
    pub(crate) fn has_transient_state(&self, id: &str) -> bool {
        self.cancel_flags.contains_key(id)
            || self.status_channels.contains_key(id)
            || self.rollback_contexts.contains_key(id)
    }
}
