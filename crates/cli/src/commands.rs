use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use events::{Event, EventBus};
use keelson_core::{
    format_duration, Build, BuildStatus, CreateProjectRequest, Project, ProjectStatus,
    UpdateProjectRequest, VcsDescriptor,
};
use orchestrator::{BuildExecutor, BuildQueue, InlineScheduler, ProjectService, Scheduler};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;
use vcs::{ShellRunner, VcsRegistry, WorkspaceLayout};

use crate::config::{KeelsonConfig, CONFIG_FILE, DATA_DIR};
use crate::{AddProject, ProjectCommand, StepsArgs, UpdateProject};

/// Everything a command needs, wired from the config.
struct App {
    service: ProjectService,
    executor: BuildExecutor,
    builds: db::BuildRepository,
    event_bus: EventBus,
}

enum Scheduling {
    /// Builds run inside the command.
    Inline,
    /// Builds stay queued for `keelson worker`.
    Deferred,
}

impl App {
    async fn open(data_dir: &Path, config: &KeelsonConfig, scheduling: Scheduling) -> Result<Self> {
        if !config.database_path(data_dir).exists() {
            bail!(
                "No database at {}. Run 'keelson init' first.",
                config.database_path(data_dir).display()
            );
        }

        let pool = db::connect(&config.database_url(data_dir))
            .await
            .context("Failed to open database")?;
        let registry = Arc::new(VcsRegistry::new(Arc::new(ShellRunner::new())));
        let layout = WorkspaceLayout::new(config.builds_root(data_dir));
        let event_bus = EventBus::new();

        let executor = BuildExecutor::new(
            pool.clone(),
            registry.clone(),
            layout.clone(),
            event_bus.clone(),
        );
        let scheduler: Arc<dyn Scheduler> = match scheduling {
            Scheduling::Inline => Arc::new(InlineScheduler::new(executor.clone())),
            Scheduling::Deferred => Arc::new(Deferred),
        };
        let builds = db::BuildRepository::new(pool.clone());
        let service = ProjectService::new(pool, registry, layout, scheduler, event_bus.clone())
            .with_locks(executor.locks().clone());

        Ok(Self {
            service,
            executor,
            builds,
            event_bus,
        })
    }

    async fn project(&self, reference: &str) -> Result<Project> {
        self.service
            .find_project(reference)
            .await?
            .ok_or_else(|| anyhow!("No project named '{}'", reference))
    }
}

/// Scheduler that leaves builds in the queue.
struct Deferred;

#[async_trait]
impl Scheduler for Deferred {
    async fn enqueue(&self, build_id: Uuid) -> orchestrator::Result<()> {
        tracing::debug!(build_id = %build_id, "Build left for the worker");
        Ok(())
    }
}

pub async fn init(data_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;

    let config_path = data_dir.join(CONFIG_FILE);
    let config = if config_path.exists() {
        println!("Using existing {}", config_path.display());
        KeelsonConfig::load(data_dir).await?
    } else {
        let config = KeelsonConfig::default();
        config.save(data_dir).await?;
        config
    };

    tokio::fs::create_dir_all(config.builds_root(data_dir)).await?;
    db::connect(&config.database_url(data_dir))
        .await
        .context("Failed to create database")?;

    println!();
    println!("Initialized keelson in {}", data_dir.display());
    println!();
    println!("  {}", config_path.display());
    println!("  {}", config.database_path(data_dir).display());
    println!("  {}/", config.builds_root(data_dir).display());
    println!();
    println!("Next steps:");
    println!("  keelson project add <name> --source <repository> --steps 'make test'");
    println!("  keelson build <name> --wait");
    if data_dir != Path::new(DATA_DIR) {
        println!();
        println!("Pass --data-dir {} to every command.", data_dir.display());
    }

    Ok(())
}

pub async fn project(data_dir: &Path, config: &KeelsonConfig, command: ProjectCommand) -> Result<()> {
    let app = App::open(data_dir, config, Scheduling::Deferred).await?;

    match command {
        ProjectCommand::Add(args) => add_project(&app, config, args).await,
        ProjectCommand::List => list_projects(&app).await,
        ProjectCommand::Show { project } => show_project(&app, &project).await,
        ProjectCommand::Update(args) => update_project(&app, args).await,
        ProjectCommand::Rename { project, new_name } => {
            let project = app.project(&project).await?;
            let update = app.service.rename_project(project.id, &new_name).await?;
            report_workspace_warning(update.workspace_warning.as_deref());
            println!("Renamed '{}' to '{}'", project.name, update.project.name);
            Ok(())
        }
        ProjectCommand::Remove { project } => {
            let project = app.project(&project).await?;
            app.service.delete_project(project.id).await?;
            println!("Removed '{}' and its builds", project.name);
            Ok(())
        }
        ProjectCommand::Move { project, position } => {
            let project = app.project(&project).await?;
            let moved = app.service.move_to(project.id, position).await?;
            println!("'{}' is now at position {}", moved.name, moved.position);
            Ok(())
        }
    }
}

async fn add_project(app: &App, config: &KeelsonConfig, args: AddProject) -> Result<()> {
    let steps = read_steps(&args.steps).await?.unwrap_or_default();
    let project = app
        .service
        .create_project(CreateProjectRequest {
            name: args.name,
            vcs: VcsDescriptor::new(args.vcs_kind, args.source, args.branch),
            steps,
            max_builds: Some(args.max_builds.unwrap_or(config.default_max_builds)),
            hook_name: args.hook_name,
        })
        .await?;

    println!("Added '{}' at position {}", project.name, project.position);
    Ok(())
}

async fn update_project(app: &App, args: UpdateProject) -> Result<()> {
    let project = app.project(&args.project).await?;
    let vcs = if args.source.is_some() || args.branch.is_some() || args.vcs_kind.is_some() {
        Some(VcsDescriptor {
            kind: args.vcs_kind.unwrap_or_else(|| project.vcs.kind.clone()),
            source: args.source.unwrap_or_else(|| project.vcs.source.clone()),
            branch: args.branch.unwrap_or_else(|| project.vcs.branch.clone()),
        })
    } else {
        None
    };

    let update = app
        .service
        .update_project(
            project.id,
            UpdateProjectRequest {
                name: None,
                vcs,
                steps: read_steps(&args.steps).await?,
                max_builds: args.max_builds,
                hook_name: args.hook_name,
                hooks: args.hooks,
            },
        )
        .await?;

    report_workspace_warning(update.workspace_warning.as_deref());
    println!("Updated '{}'", update.project.name);
    Ok(())
}

async fn list_projects(app: &App) -> Result<()> {
    let projects = app.service.list_projects().await?;
    if projects.is_empty() {
        println!("No projects yet.");
        return Ok(());
    }

    println!();
    for project in &projects {
        let status = app.service.status(project.id).await?;
        let stability = app.service.stability(project.id).await?;
        println!(
            "  {:>3}. {:<30} {:<14} {:>4} builds, {:>4} failed   {}",
            project.position,
            project.name,
            colored_status(status),
            project.total_builds,
            project.failed_builds,
            stability.describe().dimmed()
        );
    }
    println!();
    Ok(())
}

async fn show_project(app: &App, reference: &str) -> Result<()> {
    let project = app.project(reference).await?;
    let status = app.service.status(project.id).await?;
    let stability = app.service.stability(project.id).await?;
    let hooks = app.service.hooks(project.id).await?;

    println!();
    println!("{}", project.name.bold());
    println!("  Status:     {}", colored_status(status));
    println!(
        "  Stability:  {} ({})",
        stability.as_i32(),
        stability.describe()
    );
    println!(
        "  Source:     {} {} ({})",
        project.vcs.kind, project.vcs.source, project.vcs.branch
    );
    println!("  Directory:  {}", project.workspace_name());
    println!(
        "  Builds:     {} total, {} failed, keeping {}",
        project.total_builds, project.failed_builds, project.max_builds
    );
    if let Some(hook_name) = &project.hook_name {
        println!("  Hook name:  {}", hook_name);
    }
    if !hooks.is_empty() {
        println!("  Hooks:      {}", hooks.join(", "));
    }
    println!();
    println!("  Steps:");
    for line in project.steps.lines() {
        println!("    {}", line);
    }

    if let Some(build) = app.service.recent_build(project.id).await? {
        println!();
        println!("  Latest build:");
        print_build_line(&build);
    }
    println!();
    Ok(())
}

pub async fn build(
    data_dir: &Path,
    config: &KeelsonConfig,
    reference: &str,
    wait: bool,
) -> Result<()> {
    let scheduling = if wait {
        Scheduling::Inline
    } else {
        Scheduling::Deferred
    };
    let app = App::open(data_dir, config, scheduling).await?;
    let project = app.project(reference).await?;

    if !wait {
        let build = app.service.build(project.id).await?;
        println!(
            "Queued build #{} of '{}'. Run 'keelson worker' to execute it.",
            build.build_no, project.name
        );
        return Ok(());
    }

    let printer = spawn_progress_printer(&app.event_bus);
    let build = app.service.build(project.id).await?;
    printer.abort();

    println!();
    print_build(&project, &build);
    if build.status != BuildStatus::Ok {
        bail!("Build #{} finished as {}", build.build_no, build.status.as_str());
    }
    Ok(())
}

pub async fn builds(data_dir: &Path, config: &KeelsonConfig, reference: &str) -> Result<()> {
    let app = App::open(data_dir, config, Scheduling::Deferred).await?;
    let project = app.project(reference).await?;
    let builds = app.service.builds(project.id).await?;

    if builds.is_empty() {
        println!("'{}' has no builds.", project.name);
        return Ok(());
    }

    println!();
    for build in &builds {
        print_build_line(build);
    }
    println!();
    Ok(())
}

pub async fn show_build(
    data_dir: &Path,
    config: &KeelsonConfig,
    reference: &str,
    build_no: i64,
) -> Result<()> {
    let app = App::open(data_dir, config, Scheduling::Deferred).await?;
    let project = app.project(reference).await?;
    let build = app
        .service
        .build_by_number(project.id, build_no)
        .await?
        .ok_or_else(|| anyhow!("'{}' has no build #{}", project.name, build_no))?;

    println!();
    print_build(&project, &build);
    Ok(())
}

/// Run every queued build. Builds of different projects run side by side.
pub async fn worker(data_dir: &Path, config: &KeelsonConfig) -> Result<()> {
    let app = App::open(data_dir, config, Scheduling::Deferred).await?;
    let queued = app.builds.find_queued().await?;

    if queued.is_empty() {
        println!("No queued builds.");
        return Ok(());
    }

    tracing::info!(builds = queued.len(), "Draining build queue");
    let printer = spawn_progress_printer(&app.event_bus);
    let queue = BuildQueue::start(app.executor.clone());
    for build in &queued {
        queue.enqueue(build.id).await?;
    }
    queue.shutdown().await;
    printer.abort();

    println!();
    println!("Ran {} build(s).", queued.len());
    Ok(())
}

async fn read_steps(args: &StepsArgs) -> Result<Option<String>> {
    if let Some(path) = &args.steps_file {
        let steps = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(Some(steps));
    }
    Ok(args.steps.clone())
}

fn report_workspace_warning(warning: Option<&str>) {
    if let Some(warning) = warning {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
}

/// Print build progress as it happens.
fn spawn_progress_printer(event_bus: &EventBus) -> JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = receiver.recv().await {
            match envelope.event {
                Event::BuildStarted { build_no, .. } => {
                    println!("{} build #{}", "▶".cyan(), build_no);
                }
                Event::BuildStepFinished {
                    position,
                    command,
                    exit_code,
                    ..
                } => {
                    let marker = match exit_code {
                        Some(0) => "✓".green(),
                        Some(_) => "✗".red(),
                        None => "-".dimmed(),
                    };
                    println!("  {} {:>2} {}", marker, position, command);
                }
                Event::BuildFinished {
                    project_name,
                    build_no,
                    status,
                    ..
                } => {
                    println!("{} {} #{}: {}", "■".cyan(), project_name, build_no, status);
                }
                _ => {}
            }
        }
    })
}

fn colored_status(status: ProjectStatus) -> colored::ColoredString {
    let label = status.as_str();
    match status {
        ProjectStatus::NotBuilt => label.dimmed(),
        ProjectStatus::Built(BuildStatus::Ok) => label.green(),
        ProjectStatus::Built(BuildStatus::Failed) => label.red(),
        ProjectStatus::Built(BuildStatus::BuilderError) => label.magenta(),
        ProjectStatus::Built(_) => label.yellow(),
    }
}

fn print_build_line(build: &Build) {
    let duration = build
        .duration()
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());
    let commit = build
        .commit
        .as_ref()
        .map(|c| format!("{} {}", &c.commit[..c.commit.len().min(8)], first_line(&c.message)))
        .unwrap_or_default();

    println!(
        "  #{:<5} {:<14} {:>7}  {}",
        build.build_no,
        colored_status(ProjectStatus::Built(build.status)),
        duration,
        commit
    );
}

fn print_build(project: &Project, build: &Build) {
    println!(
        "{} #{}  {}",
        project.name.bold(),
        build.build_no,
        colored_status(ProjectStatus::Built(build.status))
    );
    if let Some(duration) = build.duration() {
        println!("  Duration: {}", format_duration(duration));
    }
    if let Some(commit) = &build.commit {
        println!("  Commit:   {}", commit.commit);
        println!("  Author:   {} <{}>", commit.author, commit.email);
        println!("  Message:  {}", first_line(&commit.message));
    }

    for (position, step) in build.steps.iter().enumerate() {
        let exit = step
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "skipped".to_string());
        println!();
        println!("  [{}] $ {}  ({})", position, step.command.bold(), exit);
        for line in &step.stdout {
            println!("      {}", line);
        }
    }
    println!();
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
