//! Core engine modules
//!
//! Routing and deployment functionality: the backend registry, selection
//! engine, health monitor, traffic router and deployment orchestrator,
//! plus the collaborator traits and the shared event bus.

pub mod backend;
pub mod balancer;
pub mod deploy;
pub mod engine;
pub mod events;
pub mod health;
pub mod router;
pub mod traits;
