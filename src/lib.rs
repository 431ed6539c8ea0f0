//! # Rollgate
//!
//! A backend traffic-routing and deployment-orchestration engine: a load
//! balancer that knows how to roll out new versions of the services it
//! routes to, and how to undo a rollout that goes wrong.
//!
//! ## Features
//!
//! - **Backend Registry**: Backends partitioned into healthy and failed
//!   sets, with lock-free traffic counters
//! - **Selection Engine**: Round-robin, least-connections, ip-hash and
//!   weighted selection over the healthy set
//! - **Health Monitor**: Recurring concurrent probes with failure
//!   thresholds and fail-timeout cooldowns
//! - **Traffic Router**: Request dispatch with connection tracking,
//!   pinned pools, canary splits and failover
//! - **Deployment Orchestrator**: Blue-green, canary, rolling and
//!   recreate strategies with phase auditing, single-flight per service
//!   and autonomous rollback
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rollgate::core::backend::{BackendRegistry, BackendSpec};
//! use rollgate::core::balancer::BalancingAlgorithm;
//! use rollgate::core::events::EventBus;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = BackendRegistry::new(Arc::new(EventBus::default()));
//!     registry.add_backend(BackendSpec::new("api-1", "10.0.0.1", 8080))?;
//!     registry.add_backend(BackendSpec::new("api-2", "10.0.0.2", 8080))?;
//!
//!     let backend = registry.select_backend(BalancingAlgorithm::RoundRobin, None)?;
//!     println!("routing to {}:{}", backend.host, backend.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Engine Mode
//!
//! The [`Engine`](core::engine::Engine) facade wires everything together
//! from a [`Config`](config::Config) plus the provisioner, probe and
//! metrics collaborators, and starts the health monitor loop.

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod core;
pub mod utils;

pub use config::Config;
pub use core::backend::{Backend, BackendRegistry, BackendSpec};
pub use core::balancer::BalancingAlgorithm;
pub use core::deploy::{
    DeployStrategy, DeploymentOrchestrator, DeploymentSpec, DeploymentStatus,
};
pub use core::engine::Engine;
pub use core::events::{Event, EventBus};
pub use core::health::HealthMonitor;
pub use core::router::{Dispatch, RouteRequest, TrafficRouter};
pub use utils::error::{Result, RollgateError};
