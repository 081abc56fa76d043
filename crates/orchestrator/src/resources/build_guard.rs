//! RAII guard around a running build.
//!
//! A build that leaves the executor without reaching a terminal status (an
//! error from the store, a panic in a step) would otherwise stay in
//! `progress` silently. The guard makes that visible.

use tracing::{debug, warn};
use uuid::Uuid;

use events::{Event, EventBus};

/// Emits an [`Event::Error`] when dropped before [`BuildGuard::mark_completed`].
///
/// # Example
///
/// ```ignore
/// let mut guard = BuildGuard::new(build_id, project_id, event_bus.clone());
/// // ... run steps ...
/// guard.mark_completed();
/// ```
pub struct BuildGuard {
    build_id: Uuid,
    project_id: Uuid,
    event_bus: EventBus,
    completed: bool,
}

impl BuildGuard {
    pub fn new(build_id: Uuid, project_id: Uuid, event_bus: EventBus) -> Self {
        debug!(build_id = %build_id, project_id = %project_id, "Build guard created");

        Self {
            build_id,
            project_id,
            event_bus,
            completed: false,
        }
    }

    /// The build reached a terminal status.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn build_id(&self) -> Uuid {
        self.build_id
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                build_id = %self.build_id,
                project_id = %self.project_id,
                "Build abandoned before reaching a terminal status"
            );

            self.event_bus.emit(Event::Error {
                message: format!("Build {} terminated unexpectedly", self.build_id),
                context: Some(self.project_id.to_string()),
            });
        }
    }
}
