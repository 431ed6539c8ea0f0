//! Deployment data structures

use crate::core::traits::MetricsSnapshot;
use crate::utils::error::{Result, RollgateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rollout strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployStrategy {
    /// Stand up a full parallel environment and switch traffic atomically
    BlueGreen,
    /// Shift traffic to the new version gradually while monitoring
    Canary,
    /// In-place incremental replacement delegated to the provisioner
    Rolling,
    /// Stop everything, then deploy; accepts an availability gap
    Recreate,
}

/// Deployment status state machine:
/// `pending -> running -> {completed | failed | cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    /// Whether the status is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }
}

/// One rollout request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub service_name: String,
    pub version: String,
    /// Image or artifact reference, passed through to the provisioner
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    pub strategy: DeployStrategy,
    /// Target environment, passed through opaquely
    #[serde(default)]
    pub environment: Option<String>,
    /// Health-check configuration, passed through opaquely; an optional
    /// `path` string overrides the probe path for new instances
    #[serde(default)]
    pub health_check: Option<serde_json::Value>,
    /// Per-deployment override of the configured canary ramp
    #[serde(default)]
    pub canary_ramp: Option<Vec<u8>>,
    /// Per-deployment override of the configured rollback thresholds
    #[serde(default)]
    pub thresholds: Option<RollbackThresholds>,
}

fn default_replicas() -> u32 {
    1
}

impl DeploymentSpec {
    /// Validate required fields and ramp sanity
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(RollgateError::Validation("serviceName is required".into()));
        }
        if self.version.trim().is_empty() {
            return Err(RollgateError::Validation("version is required".into()));
        }
        if self.image.trim().is_empty() {
            return Err(RollgateError::Validation("image is required".into()));
        }
        if self.replicas == 0 {
            return Err(RollgateError::Validation(
                "replicas must be at least 1".into(),
            ));
        }
        if let Some(ramp) = &self.canary_ramp {
            if ramp.is_empty() {
                return Err(RollgateError::Validation("canary ramp is empty".into()));
            }
            if ramp.iter().any(|pct| *pct == 0 || *pct > 100) {
                return Err(RollgateError::Validation(
                    "canary ramp steps must be within 1..=100".into(),
                ));
            }
        }
        Ok(())
    }

    /// Instance group name for this version of the service
    pub(crate) fn group_name(&self) -> String {
        format!("{}-{}", self.service_name, self.version)
    }

    /// Probe path for freshly deployed instances; an optional `path` in
    /// the opaque health-check config overrides the default
    pub(crate) fn health_probe_path(&self) -> String {
        self.health_check
            .as_ref()
            .and_then(|hc| hc.get("path"))
            .and_then(|p| p.as_str())
            .unwrap_or(crate::core::backend::DEFAULT_HEALTH_PATH)
            .to_string()
    }
}

/// Append-only audit record for one executed phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
}

/// One rollout attempt and its audit trail
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: String,
    pub spec: DeploymentSpec,
    pub status: DeploymentStatus,
    pub phases: Vec<PhaseRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    /// Cause of failure; always set on a failed deployment
    pub error: Option<String>,
}

impl Deployment {
    /// New pending deployment with a fresh id
    pub fn new(spec: DeploymentSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            spec,
            status: DeploymentStatus::Pending,
            phases: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            error: None,
        }
    }
}

/// Rollback thresholds evaluated against a metrics snapshot; any single
/// breach is sufficient to trigger rollback
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RollbackThresholds {
    /// Maximum tolerated error rate, in percent
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Minimum tolerated health score on a 0-100 scale
    #[serde(default = "default_min_health_score")]
    pub min_health_score: f64,
    /// Maximum tolerated latency in milliseconds
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: f64,
}

fn default_max_error_rate() -> f64 {
    5.0
}

fn default_min_health_score() -> f64 {
    80.0
}

fn default_max_latency_ms() -> f64 {
    5000.0
}

impl Default for RollbackThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: default_max_error_rate(),
            min_health_score: default_min_health_score(),
            max_latency_ms: default_max_latency_ms(),
        }
    }
}

impl RollbackThresholds {
    /// First breached threshold, if any
    pub fn breach(&self, snapshot: &MetricsSnapshot) -> Option<String> {
        if snapshot.error_rate > self.max_error_rate {
            return Some(format!(
                "error rate {:.2}% above threshold {:.2}%",
                snapshot.error_rate, self.max_error_rate
            ));
        }
        if snapshot.health_score < self.min_health_score {
            return Some(format!(
                "health score {:.1} below threshold {:.1}",
                snapshot.health_score, self.min_health_score
            ));
        }
        if snapshot.latency_ms > self.max_latency_ms {
            return Some(format!(
                "latency {:.0}ms above threshold {:.0}ms",
                snapshot.latency_ms, self.max_latency_ms
            ));
        }
        None
    }
}
