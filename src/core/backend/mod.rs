//! Backend data model
//!
//! A `Backend` is one routable instance of a service: static routing
//! configuration plus lock-free runtime state (health flag, connection and
//! request counters). All counters use atomics with `Relaxed` ordering;
//! values are eventually consistent, which is sufficient for routing
//! decisions, and no cross-field invariant needs to be updated atomically.

mod registry;

pub use registry::{BackendRegistry, RegistrySnapshot};

use crate::utils::error::{Result, RollgateError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;


/// Backend identifier (unique within a registry)
pub type BackendId = String;

pub const DEFAULT_WEIGHT: u32 = 1;
pub const DEFAULT_MAX_FAILS: u32 = 3;
pub const DEFAULT_FAIL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Specification for registering a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSpec {
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Service this backend belongs to; used to scope routing pools
    #[serde(default)]
    pub service: Option<String>,
    /// Routing weight for weighted selection (default 1)
    #[serde(default)]
    pub weight: Option<u32>,
    /// Consecutive probe failures before the backend is marked failed
    #[serde(default)]
    pub max_fails: Option<u32>,
    /// Seconds a failed backend is excluded before re-probing
    #[serde(default)]
    pub fail_timeout_secs: Option<u64>,
    /// Liveness check path (default `/health`)
    #[serde(default)]
    pub health_path: Option<String>,
}

impl BackendSpec {
    /// Minimal spec with defaults for everything but identity
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            service: None,
            weight: None,
            max_fails: None,
            fail_timeout_secs: None,
            health_path: None,
        }
    }

    /// Set the service label
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Set the routing weight
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// One routable instance of a service
#[derive(Debug)]
pub struct Backend {
    pub id: BackendId,
    pub host: String,
    pub port: u16,
    pub service: Option<String>,
    pub weight: u32,
    pub max_fails: u32,
    pub fail_timeout: Duration,
    pub health_path: String,
    state: BackendState,
}

/// Lock-free runtime state
#[derive(Debug, Default)]
struct BackendState {
    healthy: AtomicBool,
    /// Unix seconds of the last health transition; 0 = never checked
    last_health_check: AtomicU64,
    active_connections: AtomicU32,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    last_response_time_ms: AtomicU64,
}

impl Backend {
    /// Build a backend from a spec, validating identity fields and
    /// assigning defaults for the failure policy
    pub fn from_spec(spec: BackendSpec) -> Result<Self> {
        if spec.id.trim().is_empty() {
            return Err(RollgateError::Validation("backend id is required".into()));
        }
        if spec.host.trim().is_empty() {
            return Err(RollgateError::Validation("backend host is required".into()));
        }
        if spec.port == 0 {
            return Err(RollgateError::Validation("backend port is required".into()));
        }
        let weight = spec.weight.unwrap_or(DEFAULT_WEIGHT);
        if weight == 0 {
            return Err(RollgateError::Validation(
                "backend weight must be positive".into(),
            ));
        }

        let backend = Self {
            id: spec.id,
            host: spec.host,
            port: spec.port,
            service: spec.service,
            weight,
            max_fails: spec.max_fails.unwrap_or(DEFAULT_MAX_FAILS),
            fail_timeout: Duration::from_secs(
                spec.fail_timeout_secs.unwrap_or(DEFAULT_FAIL_TIMEOUT_SECS),
            ),
            health_path: spec
                .health_path
                .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string()),
            state: BackendState::default(),
        };
        backend.state.healthy.store(true, Ordering::Relaxed);
        Ok(backend)
    }

    /// Whether the backend currently passes health checks
    pub fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::Relaxed)
    }

    /// Flip the health flag and stamp the transition time
    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::Relaxed);
        self.state
            .last_health_check
            .store(Utc::now().timestamp() as u64, Ordering::Relaxed);
    }

    /// Current number of in-flight connections
    pub fn active_connections(&self) -> u32 {
        self.state.active_connections.load(Ordering::Relaxed)
    }

    /// Total requests routed to this backend
    pub fn total_requests(&self) -> u64 {
        self.state.total_requests.load(Ordering::Relaxed)
    }

    /// Requests whose forwarding failed
    pub fn failed_requests(&self) -> u64 {
        self.state.failed_requests.load(Ordering::Relaxed)
    }

    /// Account for a request starting: one more active connection,
    /// one more total request
    pub(crate) fn begin_request(&self) {
        self.state
            .active_connections
            .fetch_add(1, Ordering::Relaxed);
        self.state.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Release the active connection held by a request
    pub(crate) fn release_connection(&self) {
        self.state
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }

    /// Record the outcome of a forwarded request
    pub(crate) fn record_response(&self, elapsed_ms: u64, success: bool) {
        self.state
            .last_response_time_ms
            .store(elapsed_ms, Ordering::Relaxed);
        if !success {
            self.state.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Serializable point-in-time view of this backend
    pub fn snapshot(&self) -> BackendSnapshot {
        let checked = self.state.last_health_check.load(Ordering::Relaxed);
        BackendSnapshot {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            service: self.service.clone(),
            weight: self.weight,
            healthy: self.is_healthy(),
            last_health_check: (checked > 0)
                .then(|| Utc.timestamp_opt(checked as i64, 0).single())
                .flatten(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests(),
            failed_requests: self.failed_requests(),
            last_response_time_ms: self.state.last_response_time_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a backend, for metrics and state export
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub id: BackendId,
    pub host: String,
    pub port: u16,
    pub service: Option<String>,
    pub weight: u32,
    pub healthy: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub active_connections: u32,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub last_response_time_ms: u64,
}
