//! Error types for the routing and deployment engine

use thiserror::Error;

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, RollgateError>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum RollgateError {
    /// Unknown backend or deployment id
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend id already registered
    #[error("duplicate backend: {0}")]
    DuplicateBackend(String),

    /// The healthy set is empty; transient and expected under total outage
    #[error("no healthy backends available")]
    NoHealthyBackends,

    /// Single-flight violation: the service already has a running deployment
    #[error("deployment {active} is already running for service {service}")]
    ConflictingDeployment { service: String, active: String },

    /// Bad deployment spec or configuration value
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure during a named deployment phase
    #[error("phase {phase} failed: {message}")]
    PhaseExecution { phase: String, message: String },

    /// Cooperative cancellation observed at a phase or poll boundary
    #[error("deployment cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Health probe collaborator errors
    #[error("health probe error: {0}")]
    Probe(String),

    /// Provisioning collaborator errors
    #[error("provisioning error: {0}")]
    Provision(String),

    /// Metrics collaborator errors
    #[error("metrics error: {0}")]
    Metrics(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RollgateError {
    /// Wrap an underlying failure into a named phase error
    pub fn phase(phase: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        RollgateError::PhaseExecution {
            phase: phase.into(),
            message: cause.to_string(),
        }
    }
}
