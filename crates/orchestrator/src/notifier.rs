//! Notification of finished builds.
//!
//! Delivering to the actual hook targets is someone else's job; the executor
//! only announces that a build of a project reached a terminal status.

use async_trait::async_trait;
use db::HookRepository;
use events::{Event, EventBus};
use keelson_core::{Build, Project};
use tracing::{info, warn};

#[async_trait]
pub trait HookNotifier: Send + Sync {
    /// Called once per build, after its terminal status is stored.
    async fn notify(&self, project: &Project, build: &Build);
}

/// Publishes [`Event::BuildFinished`] with the project's hook names on the
/// event bus.
#[derive(Clone)]
pub struct EventBusNotifier {
    event_bus: EventBus,
    hooks: HookRepository,
}

impl EventBusNotifier {
    pub fn new(event_bus: EventBus, hooks: HookRepository) -> Self {
        Self { event_bus, hooks }
    }
}

#[async_trait]
impl HookNotifier for EventBusNotifier {
    async fn notify(&self, project: &Project, build: &Build) {
        let hooks = match self.hooks.names(project.id).await {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(project = %project.name, error = %e, "Failed to load hooks, notifying without them");
                Vec::new()
            }
        };

        info!(
            project = %project.name,
            build_no = build.build_no,
            status = build.status.as_str(),
            hooks = hooks.len(),
            "Notifying hooks"
        );

        self.event_bus.emit(Event::BuildFinished {
            project_id: project.id,
            project_name: project.name.clone(),
            build_id: build.id,
            build_no: build.build_no,
            status: build.status.as_str().to_string(),
            hooks,
        });
    }
}
