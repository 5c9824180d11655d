//! Shared state for the HTTP server.

use wabot_core::session::SupervisorHandle;

/// Shared state available to all HTTP handlers.
#[derive(Clone)]
pub struct SharedState {
    /// Handle to the session supervisor.
    pub supervisor: SupervisorHandle,
}

impl SharedState {
    /// Create a new shared state around a supervisor handle.
    pub fn new(supervisor: SupervisorHandle) -> Self {
        Self { supervisor }
    }
}
