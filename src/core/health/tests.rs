use super::*;
use crate::core::backend::{BackendRegistry, BackendSpec};
use crate::core::events::EventBus;
use crate::core::traits::HealthProbe;
use crate::utils::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Probe whose verdict per host is flipped by the test
#[derive(Default)]
struct FlagProbe {
    healthy: DashMap<String, bool>,
    calls: DashMap<String, u32>,
    delay: Option<Duration>,
}

impl FlagProbe {
    fn set(&self, host: &str, healthy: bool) {
        self.healthy.insert(host.to_string(), healthy);
    }

    fn calls(&self, host: &str) -> u32 {
        self.calls.get(host).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl HealthProbe for FlagProbe {
    async fn probe(&self, host: &str, _port: u16, _path: &str) -> Result<bool> {
        *self.calls.entry(host.to_string()).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.healthy.get(host).map(|v| *v).unwrap_or(true))
    }
}

fn monitor_config() -> HealthMonitorConfig {
    HealthMonitorConfig {
        check_interval: Duration::from_millis(10),
        probe_timeout: Duration::from_millis(50),
    }
}

fn setup(probe: Arc<FlagProbe>) -> (Arc<BackendRegistry>, HealthMonitor) {
    let registry = Arc::new(BackendRegistry::new(Arc::new(EventBus::default())));
    let monitor = HealthMonitor::new(monitor_config(), registry.clone(), probe);
    (registry, monitor)
}

fn spec(id: &str, host: &str, max_fails: u32, fail_timeout_secs: u64) -> BackendSpec {
    let mut spec = BackendSpec::new(id, host, 8080);
    spec.max_fails = Some(max_fails);
    spec.fail_timeout_secs = Some(fail_timeout_secs);
    spec
}

#[tokio::test]
async fn backend_fails_only_at_threshold() {
    let probe = Arc::new(FlagProbe::default());
    let (registry, monitor) = setup(probe.clone());
    registry.add_backend(spec("b1", "h1", 3, 60)).unwrap();
    probe.set("h1", false);

    monitor.run_cycle().await;
    monitor.run_cycle().await;
    assert!(registry.get("b1").unwrap().is_healthy());

    monitor.run_cycle().await;
    assert!(!registry.get("b1").unwrap().is_healthy());
    assert_eq!(registry.snapshot().failed_ids, vec!["b1".to_string()]);
}

#[tokio::test]
async fn single_pass_resets_the_failure_count() {
    let probe = Arc::new(FlagProbe::default());
    let (registry, monitor) = setup(probe.clone());
    registry.add_backend(spec("b1", "h1", 2, 60)).unwrap();

    probe.set("h1", false);
    monitor.run_cycle().await;
    probe.set("h1", true);
    monitor.run_cycle().await;
    probe.set("h1", false);
    monitor.run_cycle().await;

    // One failure after the reset is below the threshold of two
    assert!(registry.get("b1").unwrap().is_healthy());
}

#[tokio::test]
async fn failed_backend_is_not_probed_during_cooldown() {
    let probe = Arc::new(FlagProbe::default());
    let (registry, monitor) = setup(probe.clone());
    registry.add_backend(spec("b1", "h1", 1, 60)).unwrap();
    probe.set("h1", false);

    monitor.run_cycle().await;
    assert!(!registry.get("b1").unwrap().is_healthy());
    let calls_at_failure = probe.calls("h1");

    monitor.run_cycle().await;
    monitor.run_cycle().await;
    assert_eq!(probe.calls("h1"), calls_at_failure);
}

#[tokio::test]
async fn recovery_requires_a_passing_probe() {
    let probe = Arc::new(FlagProbe::default());
    let (registry, monitor) = setup(probe.clone());
    // Zero fail timeout makes the backend probe-eligible immediately
    registry.add_backend(spec("b1", "h1", 1, 0)).unwrap();
    probe.set("h1", false);

    monitor.run_cycle().await;
    assert!(!registry.get("b1").unwrap().is_healthy());

    // Still failing: eligible again, but the probe does not pass
    monitor.run_cycle().await;
    assert!(!registry.get("b1").unwrap().is_healthy());

    probe.set("h1", true);
    monitor.run_cycle().await;
    assert!(registry.get("b1").unwrap().is_healthy());
    assert!(registry.snapshot().failed_ids.is_empty());
}

#[tokio::test]
async fn probe_timeout_counts_as_failure() {
    let probe = Arc::new(FlagProbe {
        delay: Some(Duration::from_millis(200)),
        ..FlagProbe::default()
    });
    let (registry, monitor) = setup(probe.clone());
    registry.add_backend(spec("b1", "h1", 1, 60)).unwrap();
    probe.set("h1", true);

    monitor.run_cycle().await;
    assert!(!registry.get("b1").unwrap().is_healthy());
}

#[tokio::test]
async fn one_backend_failing_does_not_affect_others() {
    let probe = Arc::new(FlagProbe::default());
    let (registry, monitor) = setup(probe.clone());
    registry.add_backend(spec("b1", "h1", 1, 60)).unwrap();
    registry.add_backend(spec("b2", "h2", 1, 60)).unwrap();
    probe.set("h1", false);

    monitor.run_cycle().await;
    assert!(!registry.get("b1").unwrap().is_healthy());
    assert!(registry.get("b2").unwrap().is_healthy());
}
