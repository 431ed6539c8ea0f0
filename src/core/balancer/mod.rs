//! Selection engine
//!
//! Picks one backend from the healthy set according to a configurable
//! algorithm. Selection never mutates health state; round-robin advances
//! a shared cursor and everything else is a pure read.

mod selection;

pub use selection::select_from;

use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// Load balancing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancingAlgorithm {
    /// Monotonic cursor modulo the current healthy-set size
    #[default]
    RoundRobin,
    /// Fewest active connections, first-encountered tie break
    LeastConnections,
    /// Deterministic hash of the client key, for session affinity
    IpHash,
    /// Random draw proportional to backend weights
    WeightedRoundRobin,
}
