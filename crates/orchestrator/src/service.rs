//! Project management and the entry point for requesting builds.

use db::{BuildRepository, HookRepository, ProjectRepository};
use events::{Event, EventBus};
use keelson_core::{
    Build, CreateProjectRequest, Project, ProjectStatus, Stability, UpdateProjectRequest,
    STABILITY_WINDOW,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vcs::{VcsRegistry, WorkspaceLayout};

use crate::error::{OrchestratorError, Result};
use crate::resources::ProjectLocks;
use crate::scheduler::Scheduler;

/// Outcome of [`ProjectService::update_project`].
#[derive(Debug, Clone)]
pub struct ProjectUpdate {
    pub project: Project,
    /// Set when the project was renamed but its working directory could not
    /// be moved. The update itself was still saved.
    pub workspace_warning: Option<String>,
}

pub struct ProjectService {
    projects: ProjectRepository,
    builds: BuildRepository,
    hooks: HookRepository,
    registry: Arc<VcsRegistry>,
    layout: WorkspaceLayout,
    locks: ProjectLocks,
    scheduler: Arc<dyn Scheduler>,
    event_bus: EventBus,
}

impl ProjectService {
    pub fn new(
        pool: SqlitePool,
        registry: Arc<VcsRegistry>,
        layout: WorkspaceLayout,
        scheduler: Arc<dyn Scheduler>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            projects: ProjectRepository::new(pool.clone()),
            builds: BuildRepository::new(pool.clone()),
            hooks: HookRepository::new(pool),
            registry,
            locks: ProjectLocks::new(layout.lock_dir()),
            layout,
            scheduler,
            event_bus,
        }
    }

    /// Share the executor's locks so renames and deletes wait for a running
    /// build of the project.
    pub fn with_locks(mut self, locks: ProjectLocks) -> Self {
        self.locks = locks;
        self
    }

    pub async fn create_project(&self, request: CreateProjectRequest) -> Result<Project> {
        let project = request.into_project();
        project.validate(&self.registry.identifiers())?;

        let project = self.projects.create(&project).await?;
        info!(project = %project.name, position = project.position, "Project created");

        self.event_bus.emit(Event::ProjectCreated {
            project_id: project.id,
            name: project.name.clone(),
        });
        Ok(project)
    }

    /// Apply `request` to a project. A rename waits for any running build of
    /// the project, then moves the working directory before the new name is
    /// stored. When `request.hooks` is set the hook set is reconciled after
    /// the save.
    pub async fn update_project(
        &self,
        id: Uuid,
        request: UpdateProjectRequest,
    ) -> Result<ProjectUpdate> {
        let current = self.projects.get(id).await?;
        let updated = request.apply(&current);
        updated.validate(&self.registry.identifiers())?;

        let renamed = updated.name != current.name;
        let _lock = if renamed {
            Some(self.locks.acquire(id).await?)
        } else {
            None
        };
        self.projects.check_unique(&updated, Some(id)).await?;

        let workspace_warning = if renamed {
            self.move_workspace(&current, &updated.name).await
        } else {
            None
        };

        let project = match self.projects.update(&updated).await {
            Ok(project) => project,
            Err(e) => {
                if renamed && workspace_warning.is_none() {
                    // put the directory back where the stored name expects it
                    if let Err(undo) = self.layout.rename(&updated.name, &current.name).await {
                        warn!(project = %current.name, error = %undo, "Couldn't move working directory back");
                    }
                }
                return Err(e.into());
            }
        };

        if let Some(requested) = &request.hooks {
            let changes = self.hooks.reconcile(id, requested).await?;
            if !changes.is_empty() {
                self.event_bus.emit(Event::HooksUpdated {
                    project_id: id,
                    added: changes.to_add,
                    removed: changes.to_remove,
                });
            }
        }

        if renamed {
            info!(from = %current.name, to = %project.name, "Project renamed");
            self.event_bus.emit(Event::ProjectRenamed {
                project_id: id,
                from: current.name.clone(),
                to: project.name.clone(),
            });
        }
        self.event_bus.emit(Event::ProjectUpdated { project_id: id });

        Ok(ProjectUpdate {
            project,
            workspace_warning,
        })
    }

    pub async fn rename_project(&self, id: Uuid, new_name: &str) -> Result<ProjectUpdate> {
        self.update_project(
            id,
            UpdateProjectRequest {
                name: Some(new_name.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Delete the project with its builds and hooks, then its working
    /// directory. Waits for a running build of the project first. Failing to
    /// remove the directory does not fail the delete.
    pub async fn delete_project(&self, id: Uuid) -> Result<()> {
        let project = self.projects.get(id).await?;
        let lock = self.locks.acquire(id).await?;
        if !self.projects.delete(id).await? {
            return Err(OrchestratorError::ProjectNotFound(id));
        }

        match self.layout.remove(&project.name).await {
            Ok(true) => {}
            Ok(false) => debug!(project = %project.name, "No working directory to remove"),
            Err(e) => warn!(
                project = %project.name,
                error = %e,
                "Couldn't remove working directory"
            ),
        }
        drop(lock);
        self.locks.forget(id).await;

        info!(project = %project.name, "Project deleted");
        self.event_bus.emit(Event::ProjectDeleted {
            project_id: id,
            name: project.name,
        });
        Ok(())
    }

    /// Queue a new build of the project and hand it to the scheduler.
    ///
    /// Returns the build as it is once the scheduler accepted it: still
    /// queued for a background queue, finished for an inline one.
    pub async fn build(&self, id: Uuid) -> Result<Build> {
        let build = self.builds.create_for_project(id).await?;
        info!(project_id = %id, build_no = build.build_no, "Build queued");

        self.event_bus.emit(Event::BuildQueued {
            project_id: id,
            build_id: build.id,
            build_no: build.build_no,
        });
        self.scheduler.enqueue(build.id).await?;

        Ok(self.builds.find_by_id(build.id).await?.unwrap_or(build))
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Project> {
        Ok(self.projects.get(id).await?)
    }

    /// Look a project up by id or, failing that, by name.
    pub async fn find_project(&self, reference: &str) -> Result<Option<Project>> {
        if let Ok(id) = Uuid::parse_str(reference) {
            if let Some(project) = self.projects.find_by_id(id).await? {
                return Ok(Some(project));
            }
        }
        Ok(self.projects.find_by_name(reference).await?)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.find_all().await?)
    }

    pub async fn move_to(&self, id: Uuid, position: i64) -> Result<Project> {
        let project = self.projects.move_to(id, position).await?;
        debug!(project = %project.name, position = project.position, "Project moved");
        self.event_bus.emit(Event::ProjectUpdated { project_id: id });
        Ok(project)
    }

    /// Status of the latest build, or `NotBuilt`.
    pub async fn status(&self, id: Uuid) -> Result<ProjectStatus> {
        let latest = self.builds.latest_status(id).await?;
        Ok(ProjectStatus::from_latest(latest))
    }

    pub async fn stability(&self, id: Uuid) -> Result<Stability> {
        let statuses = self
            .builds
            .recent_terminal_statuses(id, STABILITY_WINDOW)
            .await?;
        Ok(Stability::from_statuses(&statuses))
    }

    pub async fn recent_build(&self, id: Uuid) -> Result<Option<Build>> {
        Ok(self.builds.latest_for_project(id).await?)
    }

    /// Builds of the project, newest first.
    pub async fn builds(&self, id: Uuid) -> Result<Vec<Build>> {
        Ok(self.builds.find_by_project(id).await?)
    }

    pub async fn build_by_number(&self, id: Uuid, build_no: i64) -> Result<Option<Build>> {
        Ok(self.builds.find_by_number(id, build_no).await?)
    }

    pub async fn hooks(&self, id: Uuid) -> Result<Vec<String>> {
        Ok(self.hooks.names(id).await?)
    }

    /// Move the working directory to follow a rename. Failures are reported,
    /// not raised.
    async fn move_workspace(&self, project: &Project, new_name: &str) -> Option<String> {
        match self.layout.rename(&project.name, new_name).await {
            Ok(moved) => {
                debug!(project = %project.name, moved, "Working directory follows rename");
                None
            }
            Err(e) => {
                let message = format!(
                    "Couldn't move working directory {} to {}: {}",
                    self.layout.project_dir(&project.name).display(),
                    self.layout.project_dir(new_name).display(),
                    e
                );
                warn!(project = %project.name, error = %e, "Couldn't move working directory");
                self.event_bus.emit(Event::Error {
                    message: message.clone(),
                    context: Some(project.id.to_string()),
                });
                Some(message)
            }
        }
    }
}
