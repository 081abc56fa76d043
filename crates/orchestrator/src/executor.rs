use chrono::Utc;
use db::{BuildRepository, HookRepository, ProjectRepository};
use events::{Event, EventBus};
use keelson_core::{parse_steps, Build, BuildStatus, CommitInfo, Project, StepOutput};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use vcs::{CommandRunner, VcsRegistry, VersionControl, WorkspaceLayout};

use crate::error::{OrchestratorError, Result};
use crate::notifier::{EventBusNotifier, HookNotifier};
use crate::resources::{BuildGuard, ProjectLocks};
use crate::retention::RetentionPolicy;
use crate::state_machine::BuildStateMachine;

/// Exit code recorded for a step whose process could not be run at all.
pub const RUNNER_FAILURE_EXIT_CODE: i32 = -1;

/// Runs queued builds: fetches the project's source into its working
/// directory, executes the configured steps in order and stores the outcome.
#[derive(Clone)]
pub struct BuildExecutor {
    projects: ProjectRepository,
    builds: BuildRepository,
    registry: Arc<VcsRegistry>,
    layout: WorkspaceLayout,
    runner: Arc<dyn CommandRunner>,
    locks: ProjectLocks,
    retention: RetentionPolicy,
    notifier: Arc<dyn HookNotifier>,
    event_bus: EventBus,
}

impl BuildExecutor {
    pub fn new(
        pool: SqlitePool,
        registry: Arc<VcsRegistry>,
        layout: WorkspaceLayout,
        event_bus: EventBus,
    ) -> Self {
        let builds = BuildRepository::new(pool.clone());
        Self {
            projects: ProjectRepository::new(pool.clone()),
            retention: RetentionPolicy::new(builds.clone(), event_bus.clone()),
            notifier: Arc::new(EventBusNotifier::new(
                event_bus.clone(),
                HookRepository::new(pool),
            )),
            builds,
            runner: registry.runner(),
            registry,
            locks: ProjectLocks::new(layout.lock_dir()),
            layout,
            event_bus,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn HookNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share locks with a [`crate::ProjectService`] or another executor
    /// working on the same builds root.
    pub fn with_locks(mut self, locks: ProjectLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &ProjectLocks {
        &self.locks
    }

    /// Run the build `build_id` to completion and return its final record.
    ///
    /// Builds that are no longer queued when the project lock is obtained
    /// are returned unchanged.
    pub async fn invoke(&self, build_id: Uuid) -> Result<Build> {
        let queued = self.builds.get(build_id).await?;
        let _lock = self.locks.acquire(queued.project_id).await?;

        let build = self.builds.get(build_id).await?;
        if build.status != BuildStatus::InQueue {
            info!(
                build_id = %build.id,
                status = build.status.as_str(),
                "Build is not queued, skipping"
            );
            return Ok(build);
        }

        let project = self.projects.get(build.project_id).await?;

        BuildStateMachine::validate_transition(&build.status, &BuildStatus::Progress)?;
        if !self.builds.claim(build.id, Utc::now()).await? {
            info!(build_id = %build.id, "Build was claimed by another worker, skipping");
            return Ok(self.builds.get(build.id).await?);
        }
        let mut guard = BuildGuard::new(build.id, project.id, self.event_bus.clone());

        info!(project = %project.name, build_no = build.build_no, "Build started");
        self.event_bus.emit(Event::BuildStarted {
            project_id: project.id,
            build_id: build.id,
            build_no: build.build_no,
        });

        let status = match self.complete(&project, &build).await {
            Ok(status) => status,
            Err(e) => {
                self.abandon(&project, &build, &e).await;
                return Err(e);
            }
        };
        if status != BuildStatus::Ok {
            if let Err(e) = self.projects.increment_failed_builds(project.id).await {
                error!(project = %project.name, error = %e, "Couldn't count failed build");
            }
        }
        guard.mark_completed();

        let finished = self.builds.get(build.id).await?;
        match status {
            BuildStatus::Ok => info!(
                project = %project.name,
                build_no = finished.build_no,
                status = status.as_str(),
                "Build finished"
            ),
            _ => warn!(
                project = %project.name,
                build_no = finished.build_no,
                status = status.as_str(),
                "Build finished"
            ),
        }

        if let Err(e) = self.retention.apply(&project).await {
            error!(project = %project.name, error = %e, "Retention failed");
        }
        self.notifier.notify(&project, &finished).await;

        Ok(finished)
    }

    /// Run the build and store its terminal status.
    async fn complete(&self, project: &Project, build: &Build) -> Result<BuildStatus> {
        let status = self.run(project, build).await?;

        BuildStateMachine::validate_transition(&BuildStatus::Progress, &status)?;
        self.builds
            .mark_finished(build.id, status, Utc::now())
            .await?;
        Ok(status)
    }

    /// Best effort to close a build that hit an error after it was claimed,
    /// so it doesn't stay in `progress` forever.
    async fn abandon(&self, project: &Project, build: &Build, cause: &OrchestratorError) {
        error!(
            project = %project.name,
            build_no = build.build_no,
            error = %cause,
            "Build aborted"
        );

        if let Err(e) = self
            .builds
            .mark_finished(build.id, BuildStatus::BuilderError, Utc::now())
            .await
        {
            error!(project = %project.name, error = %e, "Couldn't record aborted build");
            return;
        }
        if let Err(e) = self.projects.increment_failed_builds(project.id).await {
            error!(project = %project.name, error = %e, "Couldn't count failed build");
        }
    }

    /// Fetch and run every step, returning the status the build ends with.
    async fn run(&self, project: &Project, build: &Build) -> Result<BuildStatus> {
        let workdir = match self.layout.prepare(&project.name).await {
            Ok(dir) => dir,
            Err(e) => {
                error!(project = %project.name, error = %e, "Couldn't prepare working directory");
                let label = format!("prepare {}", self.layout.project_dir(&project.name).display());
                return self.fail_fetch(project, build, label, e.to_string()).await;
            }
        };

        let backend = match self.registry.open(&project.vcs) {
            Ok(backend) => backend,
            Err(e) => {
                error!(project = %project.name, error = %e, "No backend for project");
                let label = format!("{} fetch {}", project.vcs.kind, project.vcs.source);
                return self.fail_fetch(project, build, label, e.to_string()).await;
            }
        };

        if !self.registry.supported(backend.kind()).await {
            let message = format!("{} is not available", backend.kind().display_name());
            error!(project = %project.name, "{}", message);
            let label = format!("{} fetch {}", project.vcs.kind, project.vcs.source);
            return self.fail_fetch(project, build, label, message).await;
        }

        let mut steps = Vec::new();
        match self.fetch(project, build, backend.as_ref(), &workdir).await? {
            Some(fetch) => steps.push(fetch),
            None => return Ok(BuildStatus::BuilderError),
        }

        let commands = parse_steps(&project.steps);
        debug!(project = %project.name, steps = commands.len(), "Running build steps");

        let mut infrastructure_failure = false;
        let mut stopped = false;

        for (index, command) in commands.iter().enumerate() {
            let position = index + 1;

            if stopped {
                let placeholder = StepOutput::skipped(command.clone());
                self.record_step(project, build, position, &placeholder)
                    .await?;
                steps.push(placeholder);
                continue;
            }

            let step = match self.runner.execute(&workdir, command).await {
                Ok(output) => {
                    for line in &output.stdout {
                        trace!(build_no = build.build_no, position, "{}", line);
                    }
                    StepOutput::finished(command.clone(), output.stdout, output.exit_code)
                }
                Err(e) => {
                    error!(project = %project.name, command = %command, error = %e, "Step could not run");
                    infrastructure_failure = true;
                    StepOutput::finished(
                        command.clone(),
                        vec![e.to_string()],
                        RUNNER_FAILURE_EXIT_CODE,
                    )
                }
            };

            if !step.succeeded() {
                debug!(
                    project = %project.name,
                    position,
                    exit_code = ?step.exit_code,
                    "Step failed, skipping the rest"
                );
                stopped = true;
            }
            self.record_step(project, build, position, &step).await?;
            steps.push(step);
        }

        if infrastructure_failure {
            return Ok(BuildStatus::BuilderError);
        }
        Ok(BuildStatus::derive(&steps))
    }

    /// Step 0: clone the source and record the head commit.
    ///
    /// Returns `None` when the build can't go on.
    async fn fetch(
        &self,
        project: &Project,
        build: &Build,
        backend: &dyn VersionControl,
        workdir: &Path,
    ) -> Result<Option<StepOutput>> {
        let fetched = match backend.clone_into(workdir).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(project = %project.name, error = %e, "Fetch could not run");
                let label = format!("{} fetch {}", project.vcs.kind, project.vcs.source);
                self.fail_fetch(project, build, label, e.to_string())
                    .await?;
                return Ok(None);
            }
        };

        let step = StepOutput::fetch(
            fetched.command,
            fetched.output.stdout,
            fetched.output.exit_code,
        );
        self.record_step(project, build, 0, &step).await?;

        if !step.succeeded() {
            warn!(project = %project.name, exit_code = ?step.exit_code, "Fetch failed");
            return Ok(None);
        }

        match backend.head_info(workdir).await {
            Ok((head, command)) => {
                let commit = CommitInfo::from(head);
                debug!(project = %project.name, commit = %commit.commit, command = %command, "Fetched");
                self.builds.set_commit(build.id, &commit).await?;
                Ok(Some(step))
            }
            Err(e) => {
                error!(project = %project.name, error = %e, "Couldn't read head commit");
                Ok(None)
            }
        }
    }

    async fn fail_fetch(
        &self,
        project: &Project,
        build: &Build,
        label: String,
        message: String,
    ) -> Result<BuildStatus> {
        let step = StepOutput::fetch(label, vec![message], RUNNER_FAILURE_EXIT_CODE);
        self.record_step(project, build, 0, &step).await?;
        Ok(BuildStatus::BuilderError)
    }

    async fn record_step(
        &self,
        project: &Project,
        build: &Build,
        position: usize,
        step: &StepOutput,
    ) -> Result<()> {
        self.builds.append_step(build.id, position, step).await?;
        self.event_bus.emit(Event::BuildStepFinished {
            project_id: project.id,
            build_id: build.id,
            position,
            command: step.command.clone(),
            exit_code: step.exit_code,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keelson_core::{StepKind, VcsDescriptor};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use vcs::{CommandOutput, RunnerError, VcsKind};

    /// Answers git commands with canned output and records everything else.
    struct ScriptedRunner {
        clone_exit: i32,
        failing_command: Option<&'static str>,
        broken_command: Option<&'static str>,
        drop_steps_table: Mutex<Option<SqlitePool>>,
        executed: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                clone_exit: 0,
                failing_command: None,
                broken_command: None,
                drop_steps_table: Mutex::new(None),
                executed: Mutex::new(Vec::new()),
            }
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn execute(
            &self,
            _working_dir: &Path,
            command: &str,
        ) -> std::result::Result<CommandOutput, RunnerError> {
            if command.starts_with("git clone") {
                return Ok(CommandOutput {
                    stdout: vec!["Cloning into 'project'...".to_string()],
                    exit_code: self.clone_exit,
                });
            }
            if command.starts_with("git log") {
                return Ok(CommandOutput {
                    stdout: vec![
                        "0123456789abcdef0123456789abcdef01234567".to_string(),
                        "Jane Doe".to_string(),
                        "jane@example.org".to_string(),
                        "2024-03-01T10:00:00+00:00".to_string(),
                        "my file added".to_string(),
                    ],
                    exit_code: 0,
                });
            }

            self.executed.lock().unwrap().push(command.to_string());
            let pool = self.drop_steps_table.lock().unwrap().clone();
            if let Some(pool) = pool {
                sqlx::query("DROP TABLE build_steps")
                    .execute(&pool)
                    .await
                    .unwrap();
            }
            if self.broken_command == Some(command) {
                return Err(RunnerError::MissingDirectory("gone".to_string()));
            }
            let exit_code = if self.failing_command == Some(command) { 1 } else { 0 };
            Ok(CommandOutput {
                stdout: vec![format!("ran {}", command)],
                exit_code,
            })
        }
    }

    struct Harness {
        dir: TempDir,
        pool: SqlitePool,
        executor: BuildExecutor,
        builds: BuildRepository,
        projects: ProjectRepository,
        runner: Arc<ScriptedRunner>,
    }

    async fn harness(runner: ScriptedRunner) -> Harness {
        let dir = TempDir::new().unwrap();
        let pool = db::connect(&format!("sqlite:{}", dir.path().join("keelson.db").display()))
            .await
            .unwrap();
        let runner = Arc::new(runner);
        let registry = Arc::new(VcsRegistry::new(runner.clone()));
        registry.assume_support(VcsKind::Git, true);

        let executor = BuildExecutor::new(
            pool.clone(),
            registry,
            WorkspaceLayout::new(dir.path().join("builds")),
            EventBus::new(),
        );
        Harness {
            dir,
            pool: pool.clone(),
            executor,
            builds: BuildRepository::new(pool.clone()),
            projects: ProjectRepository::new(pool),
            runner,
        }
    }

    async fn project_with_steps(h: &Harness, steps: &str) -> Project {
        h.projects
            .create(
                &Project::new("Project", VcsDescriptor::new("git", "repo", "master"))
                    .with_steps(steps),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_build() {
        let h = harness(ScriptedRunner::new()).await;
        let project = project_with_steps(&h, "make\nmake test").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();

        let finished = h.executor.invoke(build.id).await.unwrap();

        assert_eq!(finished.status, BuildStatus::Ok);
        assert_eq!(finished.steps.len(), 3);
        assert_eq!(finished.steps[0].kind, StepKind::Fetch);
        assert_eq!(finished.steps[2].stdout, vec!["ran make test"]);
        assert!(finished.started_at.is_some());
        assert!(finished.finished_at.is_some());
        assert_eq!(finished.commit.unwrap().author, "Jane Doe");
        assert_eq!(h.projects.get(project.id).await.unwrap().failed_builds, 0);
    }

    #[tokio::test]
    async fn test_failing_step_skips_the_rest() {
        let mut runner = ScriptedRunner::new();
        runner.failing_command = Some("false");
        let h = harness(runner).await;
        let project = project_with_steps(&h, "true\nfalse\necho 'not_here'").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();

        let finished = h.executor.invoke(build.id).await.unwrap();

        assert_eq!(finished.status, BuildStatus::Failed);
        assert_eq!(finished.steps.len(), 4);
        assert_eq!(finished.steps[2].exit_code, Some(1));
        assert_eq!(finished.steps[3].command, "echo 'not_here'");
        assert_eq!(finished.steps[3].exit_code, None);
        assert!(finished.steps[3].stdout.is_empty());
        assert_eq!(h.runner.executed(), vec!["true", "false"]);
        assert_eq!(h.projects.get(project.id).await.unwrap().failed_builds, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_builder_error() {
        let mut runner = ScriptedRunner::new();
        runner.clone_exit = 128;
        let h = harness(runner).await;
        let project = project_with_steps(&h, "make").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();

        let finished = h.executor.invoke(build.id).await.unwrap();

        assert_eq!(finished.status, BuildStatus::BuilderError);
        assert_eq!(finished.steps.len(), 1);
        assert_eq!(finished.steps[0].exit_code, Some(128));
        assert!(finished.commit.is_none());
        assert!(h.runner.executed().is_empty());
    }

    #[tokio::test]
    async fn test_runner_error_is_builder_error() {
        let mut runner = ScriptedRunner::new();
        runner.broken_command = Some("make");
        let h = harness(runner).await;
        let project = project_with_steps(&h, "make\nmake test").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();

        let finished = h.executor.invoke(build.id).await.unwrap();

        assert_eq!(finished.status, BuildStatus::BuilderError);
        assert_eq!(finished.steps[1].exit_code, Some(RUNNER_FAILURE_EXIT_CODE));
        assert!(finished.steps[1].stdout[0].contains("gone"));
        assert_eq!(finished.steps[2].exit_code, None);
    }

    #[tokio::test]
    async fn test_unavailable_vcs_is_builder_error() {
        let h = harness(ScriptedRunner::new()).await;
        h.executor.registry.assume_support(VcsKind::Git, false);
        let project = project_with_steps(&h, "make").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();

        let finished = h.executor.invoke(build.id).await.unwrap();

        assert_eq!(finished.status, BuildStatus::BuilderError);
        assert_eq!(finished.steps[0].stdout, vec!["Git is not available"]);
    }

    #[tokio::test]
    async fn test_finished_build_is_not_rerun() {
        let h = harness(ScriptedRunner::new()).await;
        let project = project_with_steps(&h, "make").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();

        h.executor.invoke(build.id).await.unwrap();
        let again = h.executor.invoke(build.id).await.unwrap();

        assert_eq!(again.status, BuildStatus::Ok);
        assert_eq!(again.steps.len(), 2);
        assert_eq!(h.runner.executed(), vec!["make"]);
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let h = harness(ScriptedRunner::new()).await;
        let project = project_with_steps(&h, "make").await;
        let mut events = h.executor.event_bus.subscribe_project(project.id);
        let build = h.builds.create_for_project(project.id).await.unwrap();

        h.executor.invoke(build.id).await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..4 {
            kinds.push(match events.recv().await.unwrap().event {
                Event::BuildStarted { .. } => "started",
                Event::BuildStepFinished { .. } => "step",
                Event::BuildFinished { .. } => "finished",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["started", "step", "step", "finished"]);
    }

    #[tokio::test]
    async fn test_two_workers_claim_a_build_once() {
        let h = harness(ScriptedRunner::new()).await;
        let project = project_with_steps(&h, "make").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();
        // separate lock tables, as two processes would have
        let other = BuildExecutor::new(
            h.pool.clone(),
            h.executor.registry.clone(),
            WorkspaceLayout::new(h.dir.path().join("builds")),
            EventBus::new(),
        );

        let (first, second) = tokio::join!(h.executor.invoke(build.id), other.invoke(build.id));

        assert_eq!(first.unwrap().status, BuildStatus::Ok);
        assert_eq!(second.unwrap().status, BuildStatus::Ok);
        assert_eq!(h.runner.executed(), vec!["make"]);
        assert_eq!(h.builds.get(build.id).await.unwrap().steps.len(), 2);
    }

    #[tokio::test]
    async fn test_claimed_build_is_skipped() {
        let h = harness(ScriptedRunner::new()).await;
        let project = project_with_steps(&h, "make").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();
        assert!(h.builds.claim(build.id, Utc::now()).await.unwrap());

        let skipped = h.executor.invoke(build.id).await.unwrap();

        assert_eq!(skipped.status, BuildStatus::Progress);
        assert!(skipped.steps.is_empty());
        assert!(h.runner.executed().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_mid_build_is_closed_as_builder_error() {
        let h = harness(ScriptedRunner::new()).await;
        *h.runner.drop_steps_table.lock().unwrap() = Some(h.pool.clone());
        let project = project_with_steps(&h, "make\nmake test").await;
        let build = h.builds.create_for_project(project.id).await.unwrap();

        let result = h.executor.invoke(build.id).await;
        assert!(matches!(result, Err(OrchestratorError::Database(_))));

        let (status, finished_at): (String, Option<i64>) =
            sqlx::query_as("SELECT status, finished_at FROM builds WHERE id = ?")
                .bind(build.id.to_string())
                .fetch_one(&h.pool)
                .await
                .unwrap();
        assert_eq!(status, BuildStatus::BuilderError.as_str());
        assert!(finished_at.is_some());
        assert_eq!(h.projects.get(project.id).await.unwrap().failed_builds, 1);
        assert_eq!(h.runner.executed(), vec!["make"]);
    }
}
