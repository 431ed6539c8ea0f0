//! Rollback manager
//!
//! Strategy-specific undo logic invoked when a deployment fails, plus the
//! bounded rollback history. Every rollback records exactly one event,
//! even when an underlying cleanup call fails; cleanup failures are logged
//! and captured on the event, never re-raised.

use super::types::Deployment;
use crate::core::backend::{BackendId, BackendRegistry};
use crate::core::events::{Event, EventBus};
use crate::core::router::{TrafficRouter, TrafficSplit};
use crate::core::traits::Provisioner;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable record of one completed rollback attempt
#[derive(Debug, Clone, Serialize)]
pub struct RollbackEvent {
    pub deployment_id: String,
    pub service_name: String,
    /// Version of the deployment that was rolled back
    pub original_version: String,
    pub reason: String,
    /// First cleanup failure encountered, if any
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// What a strategy left behind, and therefore what rollback must undo
#[derive(Debug, Clone)]
pub(crate) enum RollbackContext {
    BlueGreen {
        service: String,
        blue_ids: Vec<BackendId>,
        green_ids: Vec<BackendId>,
        green_group: String,
        switched: bool,
    },
    Canary {
        service: String,
        stable_ids: Vec<BackendId>,
        canary_ids: Vec<BackendId>,
        canary_group: String,
    },
    /// Undone by re-submitting the previous completed spec; the
    /// orchestrator owns that step
    Rolling,
    Recreate {
        group: String,
        new_ids: Vec<BackendId>,
    },
}

/// Reverses failed rollouts and keeps the bounded rollback history
pub struct RollbackManager {
    router: Arc<TrafficRouter>,
    registry: Arc<BackendRegistry>,
    provisioner: Arc<dyn Provisioner>,
    events: Arc<EventBus>,
    history: Mutex<VecDeque<RollbackEvent>>,
    retention: usize,
}

impl RollbackManager {
    pub fn new(
        router: Arc<TrafficRouter>,
        registry: Arc<BackendRegistry>,
        provisioner: Arc<dyn Provisioner>,
        events: Arc<EventBus>,
        retention: usize,
    ) -> Self {
        Self {
            router,
            registry,
            provisioner,
            events,
            history: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    /// Undo a failed deployment according to its strategy context and
    /// record the attempt
    pub(crate) async fn execute(
        &self,
        deployment: &Deployment,
        context: RollbackContext,
        reason: &str,
    ) {
        info!(
            deployment = %deployment.id,
            service = %deployment.spec.service_name,
            reason = %reason,
            "rolling back deployment"
        );

        let mut cleanup_error: Option<String> = None;
        let mut record_failure = |step: &str, err: String| {
            warn!(step = %step, error = %err, "rollback cleanup step failed");
            if cleanup_error.is_none() {
                cleanup_error = Some(format!("{step}: {err}"));
            }
        };

        match context {
            RollbackContext::BlueGreen {
                service,
                blue_ids,
                green_ids,
                green_group,
                switched,
            } => {
                if switched && !blue_ids.is_empty() {
                    self.router.set_pool(&service, blue_ids);
                }
                for id in &green_ids {
                    if let Err(e) = self.registry.remove_backend(id) {
                        record_failure("remove-green-backend", e.to_string());
                    }
                }
                if !green_ids.is_empty() {
                    if let Err(e) = self.provisioner.delete_instances(&green_group).await {
                        record_failure("delete-green-instances", e.to_string());
                    }
                }
            }
            RollbackContext::Canary {
                service,
                stable_ids,
                canary_ids,
                canary_group,
            } => {
                // Zero canary traffic first so no request lands on the
                // instances being torn down
                self.router.set_traffic_split(
                    &service,
                    TrafficSplit {
                        stable: stable_ids.clone(),
                        candidate: canary_ids.clone(),
                        candidate_percent: 0,
                    },
                );
                for id in &canary_ids {
                    if let Err(e) = self.registry.remove_backend(id) {
                        record_failure("remove-canary-backend", e.to_string());
                    }
                }
                if !canary_ids.is_empty() {
                    if let Err(e) = self.provisioner.delete_instances(&canary_group).await {
                        record_failure("delete-canary-instances", e.to_string());
                    }
                }
                self.router.clear_traffic_split(&service);
                if !stable_ids.is_empty() {
                    self.router.set_pool(&service, stable_ids);
                }
            }
            RollbackContext::Rolling => {
                // Resubmission of the previous spec happens in the
                // orchestrator once the failed slot has freed
            }
            RollbackContext::Recreate { group, new_ids } => {
                for id in &new_ids {
                    if let Err(e) = self.registry.remove_backend(id) {
                        record_failure("remove-new-backend", e.to_string());
                    }
                }
                if !new_ids.is_empty() {
                    if let Err(e) = self.provisioner.delete_instances(&group).await {
                        record_failure("delete-new-instances", e.to_string());
                    }
                }
            }
        }

        self.record(RollbackEvent {
            deployment_id: deployment.id.clone(),
            service_name: deployment.spec.service_name.clone(),
            original_version: deployment.spec.version.clone(),
            reason: reason.to_string(),
            error: cleanup_error,
            timestamp: Utc::now(),
        });
    }

    /// Append an event to the bounded history, evicting the oldest beyond
    /// the retention count
    pub(crate) fn record(&self, event: RollbackEvent) {
        self.events.emit(Event::RollbackPerformed {
            deployment_id: event.deployment_id.clone(),
            service: event.service_name.clone(),
            reason: event.reason.clone(),
        });

        let mut history = self.history.lock();
        history.push_back(event);
        while history.len() > self.retention {
            history.pop_front();
        }
    }

    /// Most recent rollback events, newest first
    pub fn history(&self, limit: usize) -> Vec<RollbackEvent> {
        let history = self.history.lock();
        history.iter().rev().take(limit).cloned().collect()
    }
}
