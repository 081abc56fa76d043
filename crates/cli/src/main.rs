use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use config::{KeelsonConfig, DATA_DIR};

#[derive(Parser)]
#[command(name = "keelson")]
#[command(about = "A minimal continuous integration engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.toml, the database and the builds root.
    #[arg(long, global = true, default_value = DATA_DIR)]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, config file and database
    Init,
    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Queue a build of a project
    Build {
        project: String,
        /// Run the build now and wait for it to finish
        #[arg(long)]
        wait: bool,
    },
    /// List the builds of a project, newest first
    Builds { project: String },
    /// Show one build with the output of every step
    ShowBuild { project: String, build_no: i64 },
    /// Run every queued build, then exit
    Worker,
}

#[derive(Subcommand)]
pub enum ProjectCommand {
    Add(AddProject),
    List,
    Show {
        project: String,
    },
    Update(UpdateProject),
    Rename {
        project: String,
        new_name: String,
    },
    Remove {
        project: String,
    },
    /// Move a project to a 1-based position in the list
    Move {
        project: String,
        position: i64,
    },
}

#[derive(Args)]
pub struct AddProject {
    pub name: String,
    /// Repository to fetch from
    #[arg(long)]
    pub source: String,
    #[arg(long, default_value = "master")]
    pub branch: String,
    #[arg(long = "vcs", default_value = "git")]
    pub vcs_kind: String,
    #[command(flatten)]
    pub steps: StepsArgs,
    #[arg(long)]
    pub max_builds: Option<u32>,
    #[arg(long)]
    pub hook_name: Option<String>,
}

#[derive(Args)]
pub struct UpdateProject {
    pub project: String,
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub branch: Option<String>,
    #[arg(long = "vcs")]
    pub vcs_kind: Option<String>,
    #[command(flatten)]
    pub steps: StepsArgs,
    #[arg(long)]
    pub max_builds: Option<u32>,
    /// Empty string clears it
    #[arg(long)]
    pub hook_name: Option<String>,
    /// Replace the project's hooks with this comma separated list
    #[arg(long, value_delimiter = ',')]
    pub hooks: Option<Vec<String>>,
}

#[derive(Args)]
pub struct StepsArgs {
    /// Build steps, one command per line
    #[arg(long, conflicts_with = "steps_file")]
    pub steps: Option<String>,
    /// Read the build steps from a file
    #[arg(long)]
    pub steps_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = KeelsonConfig::load(&cli.data_dir).await?;
    init_tracing(config.log_filter.as_deref());

    match cli.command {
        Commands::Init => commands::init(&cli.data_dir).await,
        Commands::Project(command) => commands::project(&cli.data_dir, &config, command).await,
        Commands::Build { project, wait } => {
            commands::build(&cli.data_dir, &config, &project, wait).await
        }
        Commands::Builds { project } => commands::builds(&cli.data_dir, &config, &project).await,
        Commands::ShowBuild { project, build_no } => {
            commands::show_build(&cli.data_dir, &config, &project, build_no).await
        }
        Commands::Worker => commands::worker(&cli.data_dir, &config).await,
    }
}

fn init_tracing(config_filter: Option<&str>) {
    let default_filter = config_filter
        .unwrap_or("keelson=info,orchestrator=info,vcs=info,db=warn")
        .to_string();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
