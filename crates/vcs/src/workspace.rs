//! On-disk working directories of projects.
//!
//! Every project owns exactly one directory under the builds root, named by
//! [`keelson_core::workspace_name`]. All builds of the project check out into
//! it, which is why builds of one project must never overlap.

use keelson_core::workspace_name;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the per-project lock files. Its name can't come out
    /// of [`workspace_name`], so no project directory collides with it.
    pub fn lock_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    /// Working directory for the project called `project_name`.
    pub fn project_dir(&self, project_name: &str) -> PathBuf {
        self.root.join(workspace_name(project_name))
    }

    /// Make sure the project's directory exists and is empty, ready for a
    /// fresh checkout.
    pub async fn prepare(&self, project_name: &str) -> Result<PathBuf> {
        let dir = self.project_dir(project_name);

        if dir.is_dir() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    tokio::fs::remove_dir_all(&path).await?;
                } else {
                    tokio::fs::remove_file(&path).await?;
                }
            }
            debug!(dir = %dir.display(), "Cleared previous checkout");
        } else {
            tokio::fs::create_dir_all(&dir).await?;
            info!(dir = %dir.display(), "Created working directory");
        }

        Ok(dir)
    }

    /// Move a project's directory after a rename.
    ///
    /// Returns `false` when there was nothing to move.
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<bool> {
        let old_dir = self.project_dir(old_name);
        let new_dir = self.project_dir(new_name);

        if old_dir == new_dir {
            return Ok(false);
        }
        if !old_dir.exists() {
            debug!(dir = %old_dir.display(), "No working directory to rename");
            return Ok(false);
        }

        tokio::fs::rename(&old_dir, &new_dir).await?;
        info!(from = %old_dir.display(), to = %new_dir.display(), "Renamed working directory");
        Ok(true)
    }

    /// Delete a project's directory.
    ///
    /// Returns `false` when it did not exist.
    pub async fn remove(&self, project_name: &str) -> Result<bool> {
        let dir = self.project_dir(project_name);

        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Couldn't find working directory");
            return Ok(false);
        }

        tokio::fs::remove_dir_all(&dir).await?;
        info!(dir = %dir.display(), "Removed working directory");
        Ok(true)
    }
}
