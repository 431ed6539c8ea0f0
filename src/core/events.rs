//! Notification channel for registry, router and deployment events
//!
//! Mutations complete first, then an event is published on a broadcast
//! channel. Subscribers consume on their own schedule, so an emit can never
//! re-enter the mutation path.

use tokio::sync::broadcast;

/// Events published by the engine
#[derive(Debug, Clone)]
pub enum Event {
    BackendAdded { id: String },
    BackendRemoved { id: String },
    BackendHealthChanged { id: String, healthy: bool },
    FailoverInitiated,
    DeploymentStarted { id: String, service: String },
    PhaseStarted { deployment_id: String, phase: String },
    DeploymentCompleted { id: String },
    DeploymentFailed { id: String, error: String },
    DeploymentCancelled { id: String },
    RollbackPerformed { deployment_id: String, service: String, reason: String },
}

/// Broadcast-based event bus
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create an event bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event; a bus with no subscribers drops it silently
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
