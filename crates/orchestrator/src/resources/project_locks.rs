use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Per-project mutual exclusion for anything that touches a project's
/// working directory: builds, renames and deletes.
///
/// Tasks of one process queue on an in-memory mutex. Other processes sharing
/// the builds root are kept out by an exclusive lock on
/// `<lock_dir>/<project id>.lock`. Different projects do not contend.
#[derive(Clone)]
pub struct ProjectLocks {
    lock_dir: PathBuf,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

/// Held while a project's working directory is in use. Dropping it releases
/// the lock file first, then the in-process mutex.
pub struct ProjectLock {
    _file: File,
    _guard: OwnedMutexGuard<()>,
}

impl ProjectLocks {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait until nothing else, in this process or another, holds the lock of
    /// `project_id`.
    pub async fn acquire(&self, project_id: Uuid) -> io::Result<ProjectLock> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(project_id).or_default().clone()
        };

        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(project_id = %project_id, "Waiting for running build of project");
                lock.lock_owned().await
            }
        };

        let path = self.lock_path(project_id);
        let file = tokio::task::spawn_blocking(move || lock_file(&path))
            .await
            .map_err(io::Error::other)??;

        Ok(ProjectLock {
            _file: file,
            _guard: guard,
        })
    }

    /// Drop everything kept for a deleted project.
    pub async fn forget(&self, project_id: Uuid) {
        self.locks.lock().await.remove(&project_id);

        let path = self.lock_path(project_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(lock = %path.display(), error = %e, "Couldn't remove lock file"),
        }
    }

    fn lock_path(&self, project_id: Uuid) -> PathBuf {
        self.lock_dir.join(format!("{}.lock", project_id))
    }
}

fn lock_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    if file.try_lock_exclusive().is_err() {
        debug!(lock = %path.display(), "Project is locked by another process, waiting");
        file.lock_exclusive()?;
    }
    Ok(file)
}
