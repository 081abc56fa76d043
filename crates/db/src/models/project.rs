use keelson_core::{Project, VcsDescriptor};
use uuid::Uuid;

use super::{datetime_to_timestamp, timestamp_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub vcs_type: String,
    pub vcs_source: String,
    pub vcs_branch: String,
    pub steps: String,
    pub max_builds: i64,
    pub total_builds: i64,
    pub failed_builds: i64,
    pub hook_name: Option<String>,
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ProjectRow {
    pub fn into_domain(self) -> Project {
        Project {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            name: self.name,
            vcs: VcsDescriptor {
                kind: self.vcs_type,
                source: self.vcs_source,
                branch: self.vcs_branch,
            },
            steps: self.steps,
            max_builds: u32::try_from(self.max_builds).unwrap_or(0),
            total_builds: self.total_builds,
            failed_builds: self.failed_builds,
            hook_name: self.hook_name,
            position: self.position,
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        }
    }
}

impl From<&Project> for ProjectRow {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.to_string(),
            name: project.name.clone(),
            vcs_type: project.vcs.kind.clone(),
            vcs_source: project.vcs.source.clone(),
            vcs_branch: project.vcs.branch.clone(),
            steps: project.steps.clone(),
            max_builds: i64::from(project.max_builds),
            total_builds: project.total_builds,
            failed_builds: project.failed_builds,
            hook_name: project.hook_name.clone(),
            position: project.position,
            created_at: datetime_to_timestamp(project.created_at),
            updated_at: datetime_to_timestamp(project.updated_at),
        }
    }
}
