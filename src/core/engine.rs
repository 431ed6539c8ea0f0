//! Engine facade
//!
//! Wires the registry, router, health monitor and orchestrator together
//! from one `Config` plus the external collaborators, and owns the shared
//! event bus.

use crate::config::Config;
use crate::core::backend::{BackendRegistry, BackendSpec};
use crate::core::deploy::DeploymentOrchestrator;
use crate::core::events::EventBus;
use crate::core::health::HealthMonitor;
use crate::core::router::TrafficRouter;
use crate::core::traits::{HealthProbe, MetricsSource, Provisioner};
use crate::utils::error::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The assembled routing and deployment engine
pub struct Engine {
    events: Arc<EventBus>,
    registry: Arc<BackendRegistry>,
    router: Arc<TrafficRouter>,
    monitor: Arc<HealthMonitor>,
    orchestrator: Arc<DeploymentOrchestrator>,
}

impl Engine {
    /// Assemble an engine from configuration and collaborators.
    ///
    /// Backends listed in the configuration are registered immediately;
    /// the health monitor is not started until [`Engine::start`].
    pub fn new(
        config: &Config,
        provisioner: Arc<dyn Provisioner>,
        probe: Arc<dyn HealthProbe>,
        metrics: Arc<dyn MetricsSource>,
    ) -> Result<Self> {
        let events = Arc::new(EventBus::default());
        let registry = Arc::new(BackendRegistry::new(events.clone()));
        let router = Arc::new(TrafficRouter::new(
            (&config.balancer).into(),
            registry.clone(),
            events.clone(),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            (&config.health).into(),
            registry.clone(),
            probe.clone(),
        ));
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            (&config.deploy).into(),
            registry.clone(),
            router.clone(),
            provisioner,
            probe,
            metrics,
            events.clone(),
        ));

        for spec in &config.backends {
            registry.add_backend(spec.clone())?;
        }

        Ok(Self {
            events,
            registry,
            router,
            monitor,
            orchestrator,
        })
    }

    /// Register a backend after startup
    pub fn add_backend(&self, spec: BackendSpec) -> Result<()> {
        self.registry.add_backend(spec)?;
        Ok(())
    }

    /// Start the recurring health-monitor loop
    pub fn start(&self) -> JoinHandle<()> {
        self.monitor.clone().spawn()
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<TrafficRouter> {
        &self.router
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn orchestrator(&self) -> &Arc<DeploymentOrchestrator> {
        &self.orchestrator
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}
