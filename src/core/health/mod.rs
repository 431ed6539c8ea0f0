//! Health monitoring
//!
//! Periodically probes every registered backend and drives health
//! transitions in the registry.

mod monitor;

pub use monitor::{HealthMonitor, HealthMonitorConfig};

#[cfg(test)]
mod tests;
