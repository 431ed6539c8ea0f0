//! Deployment orchestration
//!
//! Runs one rollout at a time per service using one of four strategies
//! (blue-green, canary, rolling, recreate), records an append-only phase
//! log, and rolls back autonomously when a phase fails or a monitoring
//! window breaches the rollback thresholds.

mod orchestrator;
mod rollback;
mod strategies;
mod types;

pub use orchestrator::{DeploymentOrchestrator, OrchestratorConfig, StateSnapshot};
pub use rollback::{RollbackEvent, RollbackManager};
pub use types::{
    DeployStrategy, Deployment, DeploymentSpec, DeploymentStatus, PhaseRecord, RollbackThresholds,
};
