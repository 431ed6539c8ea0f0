//! Traffic router
//!
//! The request-handling path: selects a backend, tracks connection and
//! request counters, and hands the request to the caller-supplied forward
//! step. Also owns per-service routing state used by deployments: pinned
//! pools, canary traffic splits and the failover backup pool.

mod router;

pub mod metrics;

pub use metrics::RouterMetrics;
pub use router::{Dispatch, RouteRequest, RouterConfig, TrafficRouter, TrafficSplit};
