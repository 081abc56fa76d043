use db::BuildRepository;
use events::{Event, EventBus};
use keelson_core::Project;
use tracing::{debug, info};

use crate::error::Result;

/// Keeps only the newest `max_builds` builds of a project.
#[derive(Clone)]
pub struct RetentionPolicy {
    builds: BuildRepository,
    event_bus: EventBus,
}

impl RetentionPolicy {
    pub fn new(builds: BuildRepository, event_bus: EventBus) -> Self {
        Self { builds, event_bus }
    }

    /// Delete every build of `project` beyond its `max_builds` newest ones.
    /// Running it again right away deletes nothing.
    pub async fn apply(&self, project: &Project) -> Result<u64> {
        let pruned = self
            .builds
            .delete_all_but_newest(project.id, project.max_builds)
            .await?;

        if pruned > 0 {
            info!(
                project = %project.name,
                pruned,
                max_builds = project.max_builds,
                "Pruned old builds"
            );
            self.event_bus.emit(Event::BuildsPruned {
                project_id: project.id,
                count: pruned,
            });
        } else {
            debug!(project = %project.name, "No builds to prune");
        }

        Ok(pruned)
    }
}
