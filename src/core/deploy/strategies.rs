//! Strategy execution
//!
//! Phase sequences for the four rollout strategies. Each phase is logged
//! before it runs; any phase error aborts the sequence and drives rollback
//! through the context accumulated so far.

use super::orchestrator::DeploymentOrchestrator;
use super::rollback::RollbackContext;
use super::types::{DeploymentSpec, RollbackThresholds};
use crate::core::backend::{BackendId, BackendSpec};
use crate::core::router::TrafficSplit;
use crate::core::traits::{Instance, InstanceSpec};
use crate::utils::error::{Result, RollgateError};
use std::sync::atomic::AtomicBool;
use tracing::{debug, warn};

impl DeploymentOrchestrator {
    /// blue-green: deploy-green -> health-check-green -> switch-traffic ->
    /// monitor -> cleanup-blue. A failure before the switch leaves blue
    /// serving all traffic; after the switch, rollback returns to blue.
    pub(crate) async fn run_blue_green(
        &self,
        id: &str,
        spec: &DeploymentSpec,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let service = &spec.service_name;
        let blue_ids = self.registry.backends_for_service(service);
        let green_group = spec.group_name();
        let thresholds = self.thresholds_for(spec);
        let probe_path = spec.health_probe_path();

        self.rollback_contexts.insert(
            id.to_string(),
            RollbackContext::BlueGreen {
                service: service.clone(),
                blue_ids: blue_ids.clone(),
                green_ids: Vec::new(),
                green_group: green_group.clone(),
                switched: false,
            },
        );

        // Pin traffic to blue so registering green does not shift anything
        if !blue_ids.is_empty() {
            self.router.set_pool(service, blue_ids.clone());
        }

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "deploy-green", "create the green environment");
        let instances = self
            .provisioner
            .create_instances(&instance_spec(&green_group, spec))
            .await
            .map_err(|e| RollgateError::phase("deploy-green", e))?;
        let green_ids = self.register_instances(service, &instances, &probe_path, &[])?;
        self.update_blue_green_context(id, |ctx| ctx.0 = green_ids.clone());

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "health-check-green", "validate green instances");
        self.await_instances_healthy("health-check-green", &instances, &probe_path, cancel)
            .await?;

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "switch-traffic", "route all traffic to green");
        self.router.set_pool(service, green_ids.clone());
        self.update_blue_green_context(id, |ctx| ctx.1 = true);

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "monitor", "watch green against rollback thresholds");
        self.monitor_window("monitor", service, &thresholds, cancel)
            .await?;

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "cleanup-blue", "retire the blue environment");
        self.retire_backends(&blue_ids).await;
        if let Some(previous) = self.last_completed_for(service) {
            let previous_group = previous.spec.group_name();
            if previous_group == green_group {
                // Deleting it would take down the environment that was
                // just switched to
                warn!(group = %previous_group, "previous rollout shares this group, leaving it in place");
            } else if let Err(e) = self.provisioner.delete_instances(&previous_group).await {
                // Cleanup is best effort: rolling back to an already-removed
                // blue environment would be worse than leaving stragglers
                warn!(error = %e, "failed to delete blue instances");
            }
        }

        Ok(())
    }

    /// canary: for each ramp step, scale the canary to the proportional
    /// replica count, shift that percentage of traffic, and monitor; a
    /// breach at any step aborts and rolls canary traffic back to zero.
    pub(crate) async fn run_canary(
        &self,
        id: &str,
        spec: &DeploymentSpec,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let service = &spec.service_name;
        let stable_ids = self.registry.backends_for_service(service);
        let canary_group = spec.group_name();
        let thresholds = self.thresholds_for(spec);
        let probe_path = spec.health_probe_path();
        let ramp = spec
            .canary_ramp
            .clone()
            .unwrap_or_else(|| self.config.canary_ramp.clone());

        self.rollback_contexts.insert(
            id.to_string(),
            RollbackContext::Canary {
                service: service.clone(),
                stable_ids: stable_ids.clone(),
                canary_ids: Vec::new(),
                canary_group: canary_group.clone(),
            },
        );

        if !stable_ids.is_empty() {
            self.router.set_pool(service, stable_ids.clone());
        }

        let mut canary_ids: Vec<BackendId> = Vec::new();
        let mut created = false;

        for percent in ramp {
            self.check_cancelled(cancel)?;
            let phase = format!("canary-{percent}");
            self.begin_phase(
                id,
                &phase,
                &format!("shift {percent}% of traffic to the canary"),
            );

            let count = replicas_for_step(spec.replicas, percent);
            let instances = if created {
                self.provisioner
                    .resize_instances(&canary_group, count)
                    .await
                    .map_err(|e| RollgateError::phase(&phase, e))?
            } else {
                created = true;
                self.provisioner
                    .create_instances(&instance_spec_sized(&canary_group, spec, count))
                    .await
                    .map_err(|e| RollgateError::phase(&phase, e))?
            };

            let new_ids =
                self.register_instances(service, &instances, &probe_path, &canary_ids)?;
            for new_id in new_ids {
                if !canary_ids.contains(&new_id) {
                    canary_ids.push(new_id);
                }
            }
            self.update_canary_context(id, canary_ids.clone());

            self.await_instances_healthy(&phase, &instances, &probe_path, cancel)
                .await?;

            self.router.set_traffic_split(
                service,
                TrafficSplit {
                    stable: stable_ids.clone(),
                    candidate: canary_ids.clone(),
                    candidate_percent: percent,
                },
            );

            self.monitor_window(&phase, service, &thresholds, cancel)
                .await?;
        }

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "promote", "make the canary the primary");
        self.router.clear_traffic_split(service);
        self.router.set_pool(service, canary_ids);
        self.retire_backends(&stable_ids).await;
        if let Some(previous) = self.last_completed_for(service) {
            let previous_group = previous.spec.group_name();
            if previous_group == canary_group {
                warn!(group = %previous_group, "previous rollout shares this group, leaving it in place");
            } else if let Err(e) = self.provisioner.delete_instances(&previous_group).await {
                warn!(error = %e, "failed to delete previous primary instances");
            }
        }

        Ok(())
    }

    /// rolling: the provisioner replaces instances in place, then the
    /// updated set is health-checked. No traffic-weight manipulation.
    pub(crate) async fn run_rolling(
        &self,
        id: &str,
        spec: &DeploymentSpec,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let service = &spec.service_name;
        let probe_path = spec.health_probe_path();

        self.rollback_contexts
            .insert(id.to_string(), RollbackContext::Rolling);

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "rolling-update", "replace instances in place");
        // The group keeps the service's name across versions; the
        // provisioner performs its own incremental replacement, so the
        // returned instances may reuse the ids already serving
        let existing = self.registry.backends_for_service(service);
        let instances = self
            .provisioner
            .create_instances(&instance_spec(service, spec))
            .await
            .map_err(|e| RollgateError::phase("rolling-update", e))?;
        self.register_instances(service, &instances, &probe_path, &existing)?;

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "health-check", "validate the updated set");
        self.await_instances_healthy("health-check", &instances, &probe_path, cancel)
            .await?;

        Ok(())
    }

    /// recreate: stop-current -> deploy-new -> health-check. The gap
    /// between stop and health-pass is the strategy's accepted trade-off.
    pub(crate) async fn run_recreate(
        &self,
        id: &str,
        spec: &DeploymentSpec,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let service = &spec.service_name;
        let old_ids = self.registry.backends_for_service(service);
        let group = spec.group_name();
        let probe_path = spec.health_probe_path();

        self.rollback_contexts.insert(
            id.to_string(),
            RollbackContext::Recreate {
                group: group.clone(),
                new_ids: Vec::new(),
            },
        );

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "stop-current", "stop the current environment");
        self.retire_backends(&old_ids).await;
        self.router.clear_pool(service);
        if let Some(previous) = self.last_completed_for(service) {
            self.provisioner
                .delete_instances(&previous.spec.group_name())
                .await
                .map_err(|e| RollgateError::phase("stop-current", e))?;
        }

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "deploy-new", "create the new environment");
        let instances = self
            .provisioner
            .create_instances(&instance_spec(&group, spec))
            .await
            .map_err(|e| RollgateError::phase("deploy-new", e))?;
        let new_ids = self.register_instances(service, &instances, &probe_path, &[])?;
        self.update_recreate_context(id, new_ids.clone());

        self.check_cancelled(cancel)?;
        self.begin_phase(id, "health-check", "validate the new environment");
        self.await_instances_healthy("health-check", &instances, &probe_path, cancel)
            .await?;
        self.router.set_pool(service, new_ids);

        Ok(())
    }

    /// Register provisioned instances as backends of the service.
    ///
    /// Ids listed in `known` belong to this rollout (in-place replacement,
    /// resize overlap) and are skipped. Any other collision means the
    /// instance group aliases an environment that is still serving, so the
    /// rollout aborts before it can retire its own backends.
    pub(crate) fn register_instances(
        &self,
        service: &str,
        instances: &[Instance],
        probe_path: &str,
        known: &[BackendId],
    ) -> Result<Vec<BackendId>> {
        let mut ids = Vec::with_capacity(instances.len());
        for instance in instances {
            if known.contains(&instance.id) {
                debug!(backend = %instance.id, "instance already registered by this rollout");
                ids.push(instance.id.clone());
                continue;
            }
            let spec = BackendSpec {
                id: instance.id.clone(),
                host: instance.host.clone(),
                port: instance.port,
                service: Some(service.to_string()),
                weight: None,
                max_fails: None,
                fail_timeout_secs: None,
                health_path: Some(probe_path.to_string()),
            };
            match self.registry.add_backend(spec) {
                Ok(backend) => ids.push(backend.id.clone()),
                Err(RollgateError::DuplicateBackend(dup)) => {
                    return Err(RollgateError::Validation(format!(
                        "instance {dup} is already registered to a serving environment; \
                         its version appears to be deployed already"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ids)
    }

    /// Probe instances until every one passes, or the attempt budget runs
    /// out. Cancellation is observed between attempts.
    pub(crate) async fn await_instances_healthy(
        &self,
        phase: &str,
        instances: &[Instance],
        probe_path: &str,
        cancel: &AtomicBool,
    ) -> Result<()> {
        for attempt in 1..=self.config.health_check_attempts {
            self.check_cancelled(cancel)?;

            let mut all_passed = true;
            for instance in instances {
                let passed = self
                    .probe
                    .probe(&instance.host, instance.port, probe_path)
                    .await
                    .unwrap_or(false);
                if !passed {
                    debug!(
                        instance = %instance.id,
                        attempt,
                        "instance not yet healthy"
                    );
                    all_passed = false;
                    break;
                }
            }
            if all_passed {
                return Ok(());
            }
            tokio::time::sleep(self.config.health_check_interval).await;
        }

        Err(RollgateError::phase(
            phase,
            "instances did not become healthy within the attempt budget",
        ))
    }

    /// Drain and deregister backends; removal errors are logged, not fatal
    pub(crate) async fn retire_backends(&self, ids: &[BackendId]) {
        for id in ids {
            if let Err(e) = self.router.drain_connections(id, self.config.drain_wait).await {
                debug!(backend = %id, error = %e, "drain skipped");
            }
            if let Err(e) = self.registry.remove_backend(id) {
                warn!(backend = %id, error = %e, "failed to remove backend");
            }
        }
    }

    fn thresholds_for(&self, spec: &DeploymentSpec) -> RollbackThresholds {
        spec.thresholds.unwrap_or(self.config.thresholds)
    }

    fn update_blue_green_context(&self, id: &str, apply: impl FnOnce(&mut (Vec<BackendId>, bool))) {
        if let Some(mut entry) = self.rollback_contexts.get_mut(id) {
            if let RollbackContext::BlueGreen {
                green_ids,
                switched,
                ..
            } = entry.value_mut()
            {
                let mut view = (std::mem::take(green_ids), *switched);
                apply(&mut view);
                *green_ids = view.0;
                *switched = view.1;
            }
        }
    }

    fn update_canary_context(&self, id: &str, ids: Vec<BackendId>) {
        if let Some(mut entry) = self.rollback_contexts.get_mut(id) {
            if let RollbackContext::Canary { canary_ids, .. } = entry.value_mut() {
                *canary_ids = ids;
            }
        }
    }

    fn update_recreate_context(&self, id: &str, ids: Vec<BackendId>) {
        if let Some(mut entry) = self.rollback_contexts.get_mut(id) {
            if let RollbackContext::Recreate { new_ids, .. } = entry.value_mut() {
                *new_ids = ids;
            }
        }
    }
}

/// Instance group spec at the deployment's full replica count
fn instance_spec(group: &str, spec: &DeploymentSpec) -> InstanceSpec {
    instance_spec_sized(group, spec, spec.replicas)
}

fn instance_spec_sized(group: &str, spec: &DeploymentSpec, replicas: u32) -> InstanceSpec {
    InstanceSpec {
        name: group.to_string(),
        image: spec.image.clone(),
        replicas,
        environment: spec.environment.clone(),
        health_check: spec.health_check.clone(),
    }
}

/// Replica count proportional to a ramp percentage, at least one.
///
/// The product is widened to `u64`; with percent at most 100 the scaled
/// count never exceeds `total`, so narrowing back is lossless.
pub(super) fn replicas_for_step(total: u32, percent: u8) -> u32 {
    let scaled = (u64::from(total) * u64::from(percent)).div_ceil(100);
    (scaled as u32).max(1)
}
