//! Shared fakes for integration tests

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rollgate::core::traits::{
    HealthProbe, Instance, InstanceSpec, MetricsSnapshot, MetricsSource, Provisioner,
};
use rollgate::utils::error::Result;

/// In-memory provisioner producing deterministic instance ids
#[derive(Default)]
pub struct MemoryProvisioner {
    pub groups: DashMap<String, Vec<Instance>>,
}

impl MemoryProvisioner {
    fn instances_for(name: &str, replicas: u32) -> Vec<Instance> {
        (1..=replicas)
            .map(|n| Instance {
                id: format!("{name}-{n}"),
                host: format!("{name}-{n}.internal"),
                port: 8080,
            })
            .collect()
    }
}

#[async_trait]
impl Provisioner for MemoryProvisioner {
    async fn create_instances(&self, spec: &InstanceSpec) -> Result<Vec<Instance>> {
        let instances = Self::instances_for(&spec.name, spec.replicas);
        self.groups.insert(spec.name.clone(), instances.clone());
        Ok(instances)
    }

    async fn delete_instances(&self, name: &str) -> Result<()> {
        self.groups.remove(name);
        Ok(())
    }

    async fn resize_instances(&self, name: &str, count: u32) -> Result<Vec<Instance>> {
        let instances = Self::instances_for(name, count);
        self.groups.insert(name.to_string(), instances.clone());
        Ok(instances)
    }
}

/// Probe answering from a per-host verdict table; unknown hosts pass
#[derive(Default)]
pub struct TableProbe {
    verdicts: DashMap<String, bool>,
}

impl TableProbe {
    pub fn set(&self, host: &str, healthy: bool) {
        self.verdicts.insert(host.to_string(), healthy);
    }
}

#[async_trait]
impl HealthProbe for TableProbe {
    async fn probe(&self, host: &str, _port: u16, _path: &str) -> Result<bool> {
        Ok(self.verdicts.get(host).map(|v| *v).unwrap_or(true))
    }
}

/// Metrics source whose snapshot the test scripts
pub struct ScriptedMetrics {
    snapshot: Mutex<MetricsSnapshot>,
}

impl Default for ScriptedMetrics {
    fn default() -> Self {
        Self {
            snapshot: Mutex::new(MetricsSnapshot {
                error_rate: 0.0,
                latency_ms: 100.0,
                health_score: 100.0,
            }),
        }
    }
}

impl ScriptedMetrics {
    pub fn set(&self, snapshot: MetricsSnapshot) {
        *self.snapshot.lock() = snapshot;
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetrics {
    async fn snapshot(&self, _target: &str) -> Result<MetricsSnapshot> {
        Ok(*self.snapshot.lock())
    }
}
