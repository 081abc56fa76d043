use keelson_core::{Build, BuildStatus, CommitInfo, StepKind, StepOutput};
use uuid::Uuid;

use super::{datetime_to_timestamp, timestamp_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildRow {
    pub id: String,
    pub project_id: String,
    pub build_no: i64,
    pub status: String,
    pub scheduled_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub commit_hash: Option<String>,
    pub author: Option<String>,
    pub email: Option<String>,
    pub committed_at: Option<i64>,
    pub commit_message: Option<String>,
    pub created_at: i64,
}

impl BuildRow {
    /// Convert to the domain type; steps are loaded separately.
    pub fn into_domain(self, steps: Vec<StepOutput>) -> Build {
        let commit = match (self.commit_hash, self.committed_at) {
            (Some(commit), Some(committed_at)) => Some(CommitInfo {
                commit,
                author: self.author.unwrap_or_default(),
                email: self.email.unwrap_or_default(),
                committed_at: timestamp_to_datetime(committed_at),
                message: self.commit_message.unwrap_or_default(),
            }),
            _ => None,
        };

        Build {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            project_id: Uuid::parse_str(&self.project_id).unwrap_or_default(),
            build_no: self.build_no,
            status: BuildStatus::parse(&self.status).unwrap_or_default(),
            scheduled_at: timestamp_to_datetime(self.scheduled_at),
            started_at: self.started_at.map(timestamp_to_datetime),
            finished_at: self.finished_at.map(timestamp_to_datetime),
            commit,
            steps,
            created_at: timestamp_to_datetime(self.created_at),
        }
    }
}

impl From<&Build> for BuildRow {
    fn from(build: &Build) -> Self {
        let commit = build.commit.as_ref();
        Self {
            id: build.id.to_string(),
            project_id: build.project_id.to_string(),
            build_no: build.build_no,
            status: build.status.as_str().to_string(),
            scheduled_at: datetime_to_timestamp(build.scheduled_at),
            started_at: build.started_at.map(datetime_to_timestamp),
            finished_at: build.finished_at.map(datetime_to_timestamp),
            commit_hash: commit.map(|c| c.commit.clone()),
            author: commit.map(|c| c.author.clone()),
            email: commit.map(|c| c.email.clone()),
            committed_at: commit.map(|c| datetime_to_timestamp(c.committed_at)),
            commit_message: commit.map(|c| c.message.clone()),
            created_at: datetime_to_timestamp(build.created_at),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepRow {
    pub build_id: String,
    pub position: i64,
    pub kind: String,
    pub command: String,
    /// JSON array of output lines.
    pub stdout: String,
    pub exit_code: Option<i64>,
}

impl StepRow {
    pub fn new(build_id: Uuid, position: usize, step: &StepOutput) -> Result<Self, serde_json::Error> {
        Ok(Self {
            build_id: build_id.to_string(),
            position: position as i64,
            kind: step.kind.as_str().to_string(),
            command: step.command.clone(),
            stdout: serde_json::to_string(&step.stdout)?,
            exit_code: step.exit_code.map(i64::from),
        })
    }

    pub fn into_domain(self) -> StepOutput {
        StepOutput {
            kind: StepKind::parse(&self.kind).unwrap_or(StepKind::Command),
            command: self.command,
            stdout: serde_json::from_str(&self.stdout).unwrap_or_default(),
            exit_code: self.exit_code.and_then(|code| i32::try_from(code).ok()),
        }
    }
}
