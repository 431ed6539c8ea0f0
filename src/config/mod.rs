//! Configuration loading and validation
//!
//! File-backed settings for the engine, denominated in plain numbers
//! (seconds, counts, percentages) so they read naturally in YAML. Each
//! settings block converts into the corresponding runtime config type.

use crate::core::backend::BackendSpec;
use crate::core::balancer::BalancingAlgorithm;
use crate::core::deploy::{OrchestratorConfig, RollbackThresholds};
use crate::core::health::HealthMonitorConfig;
use crate::core::router::RouterConfig;
use crate::utils::error::{Result, RollgateError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub balancer: BalancerSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub deploy: DeploySettings,
    /// Backends registered at startup
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
}

impl Config {
    /// Load and validate configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RollgateError::Config(format!("failed to read config file: {e}")))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| RollgateError::Config(format!("failed to parse config: {e}")))?;

        config.validate()?;
        debug!("configuration loaded");
        Ok(config)
    }

    /// Validate cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.health.validate()?;
        self.deploy.validate()?;
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                return Err(RollgateError::Config("backend id is required".into()));
            }
            if backend.weight == Some(0) {
                return Err(RollgateError::Config(format!(
                    "backend {} has zero weight",
                    backend.id
                )));
            }
        }
        Ok(())
    }
}

/// Selection and routing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BalancerSettings {
    #[serde(default)]
    pub algorithm: BalancingAlgorithm,
    /// Poll interval while draining a backend, in milliseconds
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,
}

fn default_drain_poll_ms() -> u64 {
    50
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            algorithm: BalancingAlgorithm::default(),
            drain_poll_ms: default_drain_poll_ms(),
        }
    }
}

impl From<&BalancerSettings> for RouterConfig {
    fn from(settings: &BalancerSettings) -> Self {
        Self {
            algorithm: settings.algorithm,
            drain_poll_interval: Duration::from_millis(settings.drain_poll_ms.max(1)),
        }
    }
}

/// Health monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthSettings {
    /// Seconds between probe cycles
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Per-probe timeout in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_check_interval_secs() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl HealthSettings {
    fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(RollgateError::Config(
                "health.check_interval_secs must be positive".into(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(RollgateError::Config(
                "health.probe_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl From<&HealthSettings> for HealthMonitorConfig {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            check_interval: Duration::from_secs(settings.check_interval_secs),
            probe_timeout: Duration::from_secs(settings.probe_timeout_secs),
        }
    }
}

/// Deployment orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploySettings {
    /// Canary traffic percentages, applied in order
    #[serde(default = "default_canary_ramp")]
    pub canary_ramp: Vec<u8>,
    #[serde(default)]
    pub thresholds: RollbackThresholds,
    /// Length of each monitoring window, in seconds
    #[serde(default = "default_monitor_window_secs")]
    pub monitor_window_secs: u64,
    /// Metrics poll sub-interval inside a window, in seconds
    #[serde(default = "default_monitor_poll_secs")]
    pub monitor_poll_secs: u64,
    /// Probe attempts while waiting for new instances
    #[serde(default = "default_health_check_attempts")]
    pub health_check_attempts: u32,
    /// Seconds between those attempts
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Max seconds to drain a backend before removal
    #[serde(default = "default_drain_wait_secs")]
    pub drain_wait_secs: u64,
    /// Rollback events kept in history
    #[serde(default = "default_rollback_retention")]
    pub rollback_retention: usize,
    /// Seconds after which a running deployment is reported as stuck
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,
}

fn default_canary_ramp() -> Vec<u8> {
    vec![5, 10, 25, 50, 100]
}

fn default_monitor_window_secs() -> u64 {
    60
}

fn default_monitor_poll_secs() -> u64 {
    30
}

fn default_health_check_attempts() -> u32 {
    10
}

fn default_health_check_interval_secs() -> u64 {
    2
}

fn default_drain_wait_secs() -> u64 {
    30
}

fn default_rollback_retention() -> usize {
    50
}

fn default_stuck_threshold_secs() -> u64 {
    1800
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            canary_ramp: default_canary_ramp(),
            thresholds: RollbackThresholds::default(),
            monitor_window_secs: default_monitor_window_secs(),
            monitor_poll_secs: default_monitor_poll_secs(),
            health_check_attempts: default_health_check_attempts(),
            health_check_interval_secs: default_health_check_interval_secs(),
            drain_wait_secs: default_drain_wait_secs(),
            rollback_retention: default_rollback_retention(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
        }
    }
}

impl DeploySettings {
    fn validate(&self) -> Result<()> {
        if self.canary_ramp.is_empty() {
            return Err(RollgateError::Config("deploy.canary_ramp is empty".into()));
        }
        if self.canary_ramp.iter().any(|pct| *pct == 0 || *pct > 100) {
            return Err(RollgateError::Config(
                "deploy.canary_ramp steps must be within 1..=100".into(),
            ));
        }
        if self.health_check_attempts == 0 {
            return Err(RollgateError::Config(
                "deploy.health_check_attempts must be positive".into(),
            ));
        }
        if self.monitor_poll_secs == 0 {
            return Err(RollgateError::Config(
                "deploy.monitor_poll_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl From<&DeploySettings> for OrchestratorConfig {
    fn from(settings: &DeploySettings) -> Self {
        Self {
            canary_ramp: settings.canary_ramp.clone(),
            thresholds: settings.thresholds,
            monitor_window: Duration::from_secs(settings.monitor_window_secs),
            monitor_poll_interval: Duration::from_secs(settings.monitor_poll_secs),
            health_check_attempts: settings.health_check_attempts,
            health_check_interval: Duration::from_secs(settings.health_check_interval_secs),
            drain_wait: Duration::from_secs(settings.drain_wait_secs),
            rollback_retention: settings.rollback_retention,
            stuck_threshold: Duration::from_secs(settings.stuck_threshold_secs),
        }
    }
}

#[cfg(test)]
mod tests;
