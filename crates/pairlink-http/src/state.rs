//! Shared state for the HTTP server.

use std::sync::Arc;

use pairlink_core::event_bus::EventBus;
use pairlink_core::session::ConnectionSupervisor;

/// Shared state available to all HTTP handlers.
#[derive(Clone)]
pub struct SharedState {
    /// Owner of every user's session lifecycle.
    pub supervisor: ConnectionSupervisor,
    /// Lifecycle events streamed to websocket clients.
    pub event_bus: Arc<EventBus>,
}

impl SharedState {
    /// Wrap a supervisor, sharing its event bus.
    pub fn new(supervisor: ConnectionSupervisor) -> Self {
        let event_bus = supervisor.event_bus();
        Self {
            supervisor,
            event_bus,
        }
    }
}
