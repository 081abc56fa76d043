use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keelson_core::CommitInfo;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::registry::VcsKind;
use crate::runner::CommandOutput;

/// Metadata of the head commit of a checked-out branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadInfo {
    pub commit: String,
    pub author: String,
    pub email: String,
    pub committed_at: DateTime<Utc>,
    pub message: String,
}

impl From<HeadInfo> for CommitInfo {
    fn from(info: HeadInfo) -> Self {
        CommitInfo {
            commit: info.commit,
            author: info.author,
            email: info.email,
            committed_at: info.committed_at,
            message: info.message,
        }
    }
}

/// Result of fetching source into a working directory, together with the
/// command line that produced it.
#[derive(Debug, Clone)]
pub struct FetchOutput {
    pub command: String,
    pub output: CommandOutput,
}

/// Operations every version control backend provides.
#[async_trait]
pub trait VersionControl: Send + Sync {
    fn kind(&self) -> VcsKind;

    /// Repository location the backend fetches from.
    fn source(&self) -> &str;

    fn branch(&self) -> &str;

    /// Fetch `source`/`branch` into `destination`, which must exist and be
    /// empty. The command's own failure is reported through the exit code;
    /// `Err` means it could not be run at all.
    async fn clone_into(&self, destination: &Path) -> Result<FetchOutput>;

    /// Head commit of `branch` in the checkout at `repo_dir`, plus the command
    /// used to query it.
    async fn head_info(&self, repo_dir: &Path) -> Result<(HeadInfo, String)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_info_into_commit_info() {
        let committed_at = Utc::now();
        let info = HeadInfo {
            commit: "a".repeat(40),
            author: "Jane Doe".to_string(),
            email: "jane@example.org".to_string(),
            committed_at,
            message: "my file added".to_string(),
        };

        let commit: CommitInfo = info.into();
        assert_eq!(commit.commit.len(), 40);
        assert_eq!(commit.author, "Jane Doe");
        assert_eq!(commit.committed_at, committed_at);
    }

    #[test]
    fn test_head_info_serialization() {
        let info = HeadInfo {
            commit: "abc".to_string(),
            author: "Jane".to_string(),
            email: "jane@example.org".to_string(),
            committed_at: Utc::now(),
            message: "msg".to_string(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["commit"], "abc");
        assert_eq!(json["email"], "jane@example.org");
    }
}
