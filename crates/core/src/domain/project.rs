use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::BuildStatus;
use crate::error::ValidationError;

pub const DEFAULT_MAX_BUILDS: u32 = 10;

/// Where a project's source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsDescriptor {
    /// Backend identifier, e.g. `"git"`.
    pub kind: String,
    pub source: String,
    pub branch: String,
}

impl VcsDescriptor {
    pub fn new(
        kind: impl Into<String>,
        source: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            branch: branch.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub vcs: VcsDescriptor,
    pub steps: String,
    pub max_builds: u32,
    pub total_builds: i64,
    pub failed_builds: i64,
    pub hook_name: Option<String>,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, vcs: VcsDescriptor) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            vcs,
            steps: String::new(),
            max_builds: DEFAULT_MAX_BUILDS,
            total_builds: 0,
            failed_builds: 0,
            hook_name: None,
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_steps(mut self, steps: impl Into<String>) -> Self {
        self.steps = steps.into();
        self
    }

    pub fn with_max_builds(mut self, max_builds: u32) -> Self {
        self.max_builds = max_builds;
        self
    }

    pub fn with_hook_name(mut self, hook_name: impl Into<String>) -> Self {
        self.hook_name = normalize_hook_name(Some(hook_name.into()));
        self
    }

    /// Directory name of this project's working directory.
    pub fn workspace_name(&self) -> String {
        workspace_name(&self.name)
    }

    /// Check the field-level rules. Uniqueness of `name` and `hook_name` is
    /// enforced by the store, which is the only place that can see all
    /// projects.
    pub fn validate(&self, vcs_kinds: &[&str]) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::blank("name"));
        }
        if !vcs_kinds.contains(&self.vcs.kind.as_str()) {
            return Err(ValidationError::new(
                "vcs_type",
                format!(
                    "is not included in the list ({}): {:?}",
                    vcs_kinds.join(", "),
                    self.vcs.kind
                ),
            ));
        }
        if self.vcs.source.trim().is_empty() {
            return Err(ValidationError::blank("vcs_source"));
        }
        if self.vcs.branch.trim().is_empty() {
            return Err(ValidationError::blank("vcs_branch"));
        }
        if self.max_builds == 0 {
            return Err(ValidationError::new(
                "max_builds",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Derive the working directory name from a project name: lower-cased, with
/// every run of non-alphanumeric characters collapsed into `_`.
pub fn workspace_name(project_name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
    re.replace_all(&project_name.to_lowercase(), "_").into_owned()
}

/// Blank hook names mean "no hook" and are stored as `None`.
pub fn normalize_hook_name(hook_name: Option<String>) -> Option<String> {
    hook_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Status shown for a project: its latest build's status, or `NotBuilt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    NotBuilt,
    Built(BuildStatus),
}

impl ProjectStatus {
    pub fn from_latest(latest: Option<BuildStatus>) -> Self {
        latest.map(Self::Built).unwrap_or(Self::NotBuilt)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotBuilt => "not_built",
            Self::Built(status) => status.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub vcs: VcsDescriptor,
    #[serde(default)]
    pub steps: String,
    pub max_builds: Option<u32>,
    pub hook_name: Option<String>,
}

impl CreateProjectRequest {
    pub fn into_project(self) -> Project {
        let mut project = Project::new(self.name, self.vcs).with_steps(self.steps);
        if let Some(max_builds) = self.max_builds {
            project.max_builds = max_builds;
        }
        project.hook_name = normalize_hook_name(self.hook_name);
        project
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub vcs: Option<VcsDescriptor>,
    pub steps: Option<String>,
    pub max_builds: Option<u32>,
    /// `Some("")` clears the hook name.
    pub hook_name: Option<String>,
    /// When set, the project's hooks are reconciled against this set.
    pub hooks: Option<Vec<String>>,
}

impl UpdateProjectRequest {
    /// Apply the changed fields onto a copy of `project`.
    pub fn apply(&self, project: &Project) -> Project {
        let mut updated = project.clone();
        if let Some(name) = &self.name {
            updated.name = name.clone();
        }
        if let Some(vcs) = &self.vcs {
            updated.vcs = vcs.clone();
        }
        if let Some(steps) = &self.steps {
            updated.steps = steps.clone();
        }
        if let Some(max_builds) = self.max_builds {
            updated.max_builds = max_builds;
        }
        if let Some(hook_name) = &self.hook_name {
            updated.hook_name = normalize_hook_name(Some(hook_name.clone()));
        }
        updated.updated_at = Utc::now();
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git() -> VcsDescriptor {
        VcsDescriptor::new("git", "test/files/repo", "master")
    }

    #[test]
    fn test_project_creation() {
        let project = Project::new("Project", git()).with_steps("ls -al file");

        assert_eq!(project.name, "Project");
        assert_eq!(project.steps, "ls -al file");
        assert_eq!(project.max_builds, DEFAULT_MAX_BUILDS);
        assert_eq!(project.total_builds, 0);
        assert_eq!(project.failed_builds, 0);
        assert!(project.hook_name.is_none());
    }

    #[test]
    fn test_workspace_name() {
        assert_eq!(workspace_name("Project"), "project");
        assert_eq!(workspace_name("my name"), "my_name");
        assert_eq!(workspace_name("My  Other -- Name!"), "my_other_name_");
        assert_eq!(workspace_name("ci.v2"), "ci_v2");
    }

    #[test]
    fn test_validate_ok() {
        let project = Project::new("Project", git());
        assert!(project.validate(&["git"]).is_ok());
    }

    #[test]
    fn test_validate_blank_name() {
        let project = Project::new("  ", git());
        let err = project.validate(&["git"]).unwrap_err();
        assert_eq!(err.field, "name");
    }

    #[test]
    fn test_validate_unknown_vcs() {
        let project = Project::new("Project", VcsDescriptor::new("lol", "repo", "master"));
        let err = project.validate(&["git"]).unwrap_err();
        assert_eq!(err.field, "vcs_type");
    }

    #[test]
    fn test_validate_blank_source_and_branch() {
        let project = Project::new("Project", VcsDescriptor::new("git", "", "master"));
        assert_eq!(project.validate(&["git"]).unwrap_err().field, "vcs_source");

        let project = Project::new("Project", VcsDescriptor::new("git", "repo", " "));
        assert_eq!(project.validate(&["git"]).unwrap_err().field, "vcs_branch");
    }

    #[test]
    fn test_validate_zero_max_builds() {
        let project = Project::new("Project", git()).with_max_builds(0);
        assert_eq!(project.validate(&["git"]).unwrap_err().field, "max_builds");
    }

    #[test]
    fn test_blank_hook_name_is_none() {
        let project = Project::new("Project", git()).with_hook_name("   ");
        assert!(project.hook_name.is_none());

        let project = Project::new("Project", git()).with_hook_name("deploy");
        assert_eq!(project.hook_name.as_deref(), Some("deploy"));
    }

    #[test]
    fn test_project_status() {
        assert_eq!(ProjectStatus::from_latest(None), ProjectStatus::NotBuilt);
        assert_eq!(ProjectStatus::NotBuilt.as_str(), "not_built");
        assert_eq!(
            ProjectStatus::from_latest(Some(BuildStatus::Failed)).as_str(),
            "failed"
        );
    }

    #[test]
    fn test_update_request_apply() {
        let project = Project::new("Project", git()).with_hook_name("deploy");
        let update = UpdateProjectRequest {
            name: Some("Renamed".to_string()),
            hook_name: Some(String::new()),
            ..Default::default()
        };

        let updated = update.apply(&project);
        assert_eq!(updated.name, "Renamed");
        assert!(updated.hook_name.is_none());
        assert_eq!(updated.id, project.id);
        assert_eq!(updated.steps, project.steps);
    }
}
