//! External collaborator interfaces
//!
//! The engine configures routing and orchestrates rollouts; actually
//! creating compute instances, probing liveness and measuring traffic are
//! jobs for external collaborators reached through these seams.

use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One compute instance created by the provisioner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub host: String,
    pub port: u16,
}

/// Request to the provisioner for a named instance group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Instance group name
    pub name: String,
    /// Image or artifact reference
    pub image: String,
    pub replicas: u32,
    /// Target environment, passed through opaquely
    #[serde(default)]
    pub environment: Option<String>,
    /// Health-check configuration, passed through opaquely
    #[serde(default)]
    pub health_check: Option<serde_json::Value>,
}

/// Creates, resizes and destroys compute instances.
///
/// Deleting an already-deleted group is expected to be tolerated.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_instances(&self, spec: &InstanceSpec) -> Result<Vec<Instance>>;

    async fn delete_instances(&self, name: &str) -> Result<()>;

    /// Resize a group and return its current instances
    async fn resize_instances(&self, name: &str, count: u32) -> Result<Vec<Instance>>;
}

/// Issues liveness checks, both for steady-state backends and for freshly
/// deployed instances
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16, path: &str) -> Result<bool>;
}

/// Telemetry snapshot for a service or deployment
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Failed-request percentage over the sampling window
    pub error_rate: f64,
    /// Request latency in milliseconds
    pub latency_ms: f64,
    /// Composite health score on a 0-100 scale
    pub health_score: f64,
}

/// Supplies telemetry consumed by rollback-threshold evaluation. How the
/// snapshot is computed is the collaborator's concern.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn snapshot(&self, target: &str) -> Result<MetricsSnapshot>;
}
