use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    InQueue,
    Progress,
    Ok,
    Failed,
    BuilderError,
}

impl BuildStatus {
    pub const TERMINAL: [BuildStatus; 3] = [Self::Ok, Self::Failed, Self::BuilderError];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InQueue => "in_queue",
            Self::Progress => "progress",
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::BuilderError => "builder_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_queue" => Some(Self::InQueue),
            "progress" => Some(Self::Progress),
            "ok" => Some(Self::Ok),
            "failed" => Some(Self::Failed),
            "builder_error" => Some(Self::BuilderError),
            _ => None,
        }
    }

    /// A terminal build will not change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::BuilderError)
    }

    /// Final status of a build from its recorded steps.
    ///
    /// A failed fetch step is an infrastructure problem and wins over
    /// anything else; otherwise any configured step with a non-zero exit code
    /// fails the build. Placeholder steps that never ran are ignored.
    pub fn derive(steps: &[StepOutput]) -> Self {
        let fetch_ok = steps
            .iter()
            .find(|step| step.kind == StepKind::Fetch)
            .map(|step| step.succeeded())
            .unwrap_or(false);
        if !fetch_ok {
            return Self::BuilderError;
        }

        let command_failed = steps
            .iter()
            .filter(|step| step.kind == StepKind::Command)
            .any(|step| matches!(step.exit_code, Some(code) if code != 0));
        if command_failed {
            Self::Failed
        } else {
            Self::Ok
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// The implicit source fetch that opens every build.
    Fetch,
    /// A command from the project's step configuration.
    Command,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Command => "command",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "command" => Some(Self::Command),
            _ => None,
        }
    }
}

/// Captured result of one step in a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub kind: StepKind,
    pub command: String,
    pub stdout: Vec<String>,
    /// `None` until the step has run.
    pub exit_code: Option<i32>,
}

impl StepOutput {
    pub fn fetch(command: impl Into<String>, stdout: Vec<String>, exit_code: i32) -> Self {
        Self {
            kind: StepKind::Fetch,
            command: command.into(),
            stdout,
            exit_code: Some(exit_code),
        }
    }

    pub fn finished(command: impl Into<String>, stdout: Vec<String>, exit_code: i32) -> Self {
        Self {
            kind: StepKind::Command,
            command: command.into(),
            stdout,
            exit_code: Some(exit_code),
        }
    }

    /// A configured step that was never executed.
    pub fn skipped(command: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Command,
            command: command.into(),
            stdout: Vec::new(),
            exit_code: None,
        }
    }

    pub fn has_run(&self) -> bool {
        self.exit_code.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Head commit metadata recorded once the source fetch succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub commit: String,
    pub author: String,
    pub email: String,
    pub committed_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub project_id: Uuid,
    pub build_no: i64,
    pub status: BuildStatus,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub commit: Option<CommitInfo>,
    pub steps: Vec<StepOutput>,
    pub created_at: DateTime<Utc>,
}

impl Build {
    pub fn new(project_id: Uuid, build_no: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            build_no,
            status: BuildStatus::default(),
            scheduled_at: now,
            started_at: None,
            finished_at: None,
            commit: None,
            steps: Vec::new(),
            created_at: now,
        }
    }

    /// The synthetic source fetch step, if the build got that far.
    pub fn fetch_step(&self) -> Option<&StepOutput> {
        self.steps.iter().find(|step| step.kind == StepKind::Fetch)
    }

    /// Configured steps in order, including ones that never ran.
    pub fn command_steps(&self) -> impl Iterator<Item = &StepOutput> {
        self.steps
            .iter()
            .filter(|step| step.kind == StepKind::Command)
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some(finished - started),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_ok() -> StepOutput {
        StepOutput::fetch("git clone", vec!["Cloning...".to_string()], 0)
    }

    #[test]
    fn test_build_creation() {
        let project_id = Uuid::new_v4();
        let build = Build::new(project_id, 3);

        assert_eq!(build.project_id, project_id);
        assert_eq!(build.build_no, 3);
        assert_eq!(build.status, BuildStatus::InQueue);
        assert!(build.started_at.is_none());
        assert!(build.steps.is_empty());
        assert!(build.duration().is_none());
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            BuildStatus::InQueue,
            BuildStatus::Progress,
            BuildStatus::Ok,
            BuildStatus::Failed,
            BuildStatus::BuilderError,
        ] {
            assert_eq!(BuildStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BuildStatus::parse("invalid"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!BuildStatus::InQueue.is_terminal());
        assert!(!BuildStatus::Progress.is_terminal());
        assert!(BuildStatus::TERMINAL.iter().all(|s| s.is_terminal()));
    }

    #[test]
    fn test_derive_ok() {
        let steps = vec![
            fetch_ok(),
            StepOutput::finished("git diff file", vec![], 0),
            StepOutput::finished("echo 'lol'", vec!["lol".to_string()], 0),
        ];
        assert_eq!(BuildStatus::derive(&steps), BuildStatus::Ok);
    }

    #[test]
    fn test_derive_failed() {
        let steps = vec![
            fetch_ok(),
            StepOutput::finished("ls -al file", vec![], 0),
            StepOutput::finished("ls -al not_a_file", vec![], 2),
            StepOutput::skipped("echo 'not_here'"),
        ];
        assert_eq!(BuildStatus::derive(&steps), BuildStatus::Failed);
    }

    #[test]
    fn test_derive_fetch_failure_is_builder_error() {
        let steps = vec![StepOutput::fetch("git clone", vec![], 128)];
        assert_eq!(BuildStatus::derive(&steps), BuildStatus::BuilderError);
        assert_eq!(BuildStatus::derive(&[]), BuildStatus::BuilderError);
    }

    #[test]
    fn test_step_accessors() {
        let mut build = Build::new(Uuid::new_v4(), 1);
        build.steps = vec![
            fetch_ok(),
            StepOutput::finished("make", vec![], 1),
            StepOutput::skipped("make test"),
        ];

        assert_eq!(build.fetch_step().map(|s| s.command.as_str()), Some("git clone"));
        let commands: Vec<&str> = build.command_steps().map(|s| s.command.as_str()).collect();
        assert_eq!(commands, vec!["make", "make test"]);
        assert!(!build.steps[2].has_run());
    }

    #[test]
    fn test_duration() {
        let mut build = Build::new(Uuid::new_v4(), 1);
        let started = Utc::now();
        build.started_at = Some(started);
        build.finished_at = Some(started + Duration::seconds(75));
        assert_eq!(build.duration(), Some(Duration::seconds(75)));
    }
}
