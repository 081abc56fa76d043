use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, VcsError};
use crate::registry::VcsKind;
use crate::runner::{shell_quote, CommandRunner};
use crate::traits::{FetchOutput, HeadInfo, VersionControl};

const HEAD_FORMAT: &str = "--pretty=format:%H%n%an%n%ae%n%aI%n%B";

pub struct GitVcs {
    source: String,
    branch: String,
    /// Directory clone commands are started from; relative sources resolve
    /// against it.
    base_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl GitVcs {
    pub fn new(
        source: impl Into<String>,
        branch: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            source: source.into(),
            branch: branch.into(),
            base_dir: PathBuf::from("."),
            runner,
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    fn clone_command(&self, destination: &Path) -> String {
        let dest = shell_quote(&destination.display().to_string());
        let source = shell_quote(&self.source);
        let branch = shell_quote(&self.branch);
        format!(
            "git clone --depth 1 --branch {branch} {source} {dest} && cd {dest} && git checkout -B {branch} && git pull --ff-only origin {branch}",
        )
    }

    fn head_info_command(&self) -> String {
        format!(
            "git log --max-count=1 {} {} --",
            shell_quote(HEAD_FORMAT),
            shell_quote(&self.branch)
        )
    }
}

#[async_trait]
impl VersionControl for GitVcs {
    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn clone_into(&self, destination: &Path) -> Result<FetchOutput> {
        let command = self.clone_command(destination);
        debug!(source = %self.source, branch = %self.branch, dest = %destination.display(), "Cloning");

        let output = self.runner.execute(&self.base_dir, &command).await?;
        if !output.is_success() {
            warn!(
                source = %self.source,
                branch = %self.branch,
                exit_code = output.exit_code,
                "git clone failed"
            );
        }

        Ok(FetchOutput { command, output })
    }

    async fn head_info(&self, repo_dir: &Path) -> Result<(HeadInfo, String)> {
        let command = self.head_info_command();
        let output = self.runner.execute(repo_dir, &command).await?;

        if !output.is_success() {
            return Err(VcsError::CommandFailed(format!(
                "{} exited with {}: {}",
                command,
                output.exit_code,
                output.stdout.join("\n")
            )));
        }

        let info = parse_head_info(&output.stdout)?;
        Ok((info, command))
    }
}

/// Parse the output of `git log` in [`HEAD_FORMAT`].
fn parse_head_info(lines: &[String]) -> Result<HeadInfo> {
    let mut lines = lines.iter();
    let mut next = |field: &str| {
        lines
            .next()
            .cloned()
            .ok_or_else(|| VcsError::Parse(format!("missing {} in git log output", field)))
    };

    let commit = next("commit hash")?;
    let author = next("author name")?;
    let email = next("author email")?;
    let date = next("commit date")?;
    let committed_at = DateTime::parse_from_rfc3339(date.trim())
        .map_err(|e| VcsError::Parse(format!("invalid commit date {:?}: {}", date, e)))?
        .with_timezone(&Utc);

    let message = lines
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string();

    Ok(HeadInfo {
        commit,
        author,
        email,
        committed_at,
        message,
    })
}
