//! Shared state for API handlers.

use crate::controller::ControllerHandle;
use crate::status::StatusRegistry;
use std::sync::Arc;

/// Application state shared across all request handlers.
pub struct AppState {
    /// Handle to the running controller.
    pub handle: ControllerHandle,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(handle: ControllerHandle) -> Self {
        Self { handle }
    }

    /// The status registry behind the controller handle.
    #[must_use]
    pub fn status(&self) -> Arc<StatusRegistry> {
        self.handle.status()
    }
}
