use crate::error::DbError;
use crate::models::{datetime_to_timestamp, BuildRow, StepRow};
use chrono::{DateTime, Utc};
use keelson_core::{Build, BuildStatus, CommitInfo, StepOutput};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

const BUILD_COLUMNS: &str = "id, project_id, build_no, status, scheduled_at, started_at, finished_at, commit_hash, author, email, committed_at, commit_message, created_at";

/// Newest first. `build_no` breaks ties between builds created in the same
/// millisecond.
const NEWEST_FIRST: &str = "ORDER BY created_at DESC, build_no DESC";

#[derive(Clone)]
pub struct BuildRepository {
    pool: SqlitePool,
}

impl BuildRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the next build of a project.
    ///
    /// Bumping `total_builds` and inserting the build happen in one
    /// transaction, so `build_no` always equals the counter value it was
    /// created under. The counter is bumped first to take the write lock
    /// before anything is read.
    pub async fn create_for_project(&self, project_id: Uuid) -> Result<Build, DbError> {
        let mut tx = self.pool.begin().await?;

        let (build_no,): (i64,) = sqlx::query_as(
            "UPDATE projects SET total_builds = total_builds + 1 WHERE id = ? RETURNING total_builds",
        )
        .bind(project_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::ProjectNotFound(project_id))?;

        let build = Build::new(project_id, build_no);
        let row = BuildRow::from(&build);

        sqlx::query(
            r#"
            INSERT INTO builds (id, project_id, build_no, status, scheduled_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.project_id)
        .bind(row.build_no)
        .bind(&row.status)
        .bind(row.scheduled_at)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(project_id = %project_id, build_no, "Build created");
        Ok(build)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Build>, DbError> {
        let row: Option<BuildRow> = sqlx::query_as(&format!(
            "SELECT {} FROM builds WHERE id = ?",
            BUILD_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let steps = self.steps_for(id).await?;
                Ok(Some(row.into_domain(steps)))
            }
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Build, DbError> {
        self.find_by_id(id).await?.ok_or(DbError::BuildNotFound(id))
    }

    pub async fn find_by_number(
        &self,
        project_id: Uuid,
        build_no: i64,
    ) -> Result<Option<Build>, DbError> {
        let id: Option<(String,)> =
            sqlx::query_as("SELECT id FROM builds WHERE project_id = ? AND build_no = ?")
                .bind(project_id.to_string())
                .bind(build_no)
                .fetch_optional(&self.pool)
                .await?;

        match id.and_then(|(id,)| Uuid::parse_str(&id).ok()) {
            Some(id) => self.find_by_id(id).await,
            None => Ok(None),
        }
    }

    /// All builds of a project, newest first, with their steps.
    pub async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Build>, DbError> {
        let rows: Vec<BuildRow> = sqlx::query_as(&format!(
            "SELECT {} FROM builds WHERE project_id = ? {}",
            BUILD_COLUMNS, NEWEST_FIRST
        ))
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let step_rows: Vec<StepRow> = sqlx::query_as(
            r#"
            SELECT s.build_id, s.position, s.kind, s.command, s.stdout, s.exit_code
            FROM build_steps s
            JOIN builds b ON b.id = s.build_id
            WHERE b.project_id = ?
            ORDER BY s.build_id, s.position ASC
            "#,
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut steps: HashMap<String, Vec<StepOutput>> = HashMap::new();
        for step in step_rows {
            steps
                .entry(step.build_id.clone())
                .or_default()
                .push(step.into_domain());
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let build_steps = steps.remove(&row.id).unwrap_or_default();
                row.into_domain(build_steps)
            })
            .collect())
    }

    /// Most recently created build of a project.
    pub async fn latest_for_project(&self, project_id: Uuid) -> Result<Option<Build>, DbError> {
        let id: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT id FROM builds WHERE project_id = ? {} LIMIT 1",
            NEWEST_FIRST
        ))
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match id.and_then(|(id,)| Uuid::parse_str(&id).ok()) {
            Some(id) => self.find_by_id(id).await,
            None => Ok(None),
        }
    }

    pub async fn latest_status(&self, project_id: Uuid) -> Result<Option<BuildStatus>, DbError> {
        let status: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT status FROM builds WHERE project_id = ? {} LIMIT 1",
            NEWEST_FIRST
        ))
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(status.and_then(|(s,)| BuildStatus::parse(&s)))
    }

    /// Statuses of the newest `limit` builds that have finished, newest first.
    /// Queued and running builds are excluded before the limit applies.
    pub async fn recent_terminal_statuses(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<Vec<BuildStatus>, DbError> {
        let terminal = BuildStatus::TERMINAL;
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT status FROM builds WHERE project_id = ? AND status IN (?, ?, ?) {} LIMIT ?",
            NEWEST_FIRST
        ))
        .bind(project_id.to_string())
        .bind(terminal[0].as_str())
        .bind(terminal[1].as_str())
        .bind(terminal[2].as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(s,)| BuildStatus::parse(&s))
            .collect())
    }

    pub async fn count_for_project(&self, project_id: Uuid) -> Result<i64, DbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM builds WHERE project_id = ?")
            .bind(project_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Builds still waiting to run, oldest first.
    pub async fn find_queued(&self) -> Result<Vec<Build>, DbError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM builds WHERE status = ? ORDER BY scheduled_at ASC, build_no ASC",
        )
        .bind(BuildStatus::InQueue.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut builds = Vec::with_capacity(ids.len());
        for (id,) in ids {
            let id = match Uuid::parse_str(&id) {
                Ok(id) => id,
                Err(e) => {
                    warn!(build_id = %id, error = %e, "Skipping queued build with malformed id");
                    continue;
                }
            };
            if let Some(build) = self.find_by_id(id).await? {
                builds.push(build);
            }
        }
        Ok(builds)
    }

    /// Move a queued build to `progress`.
    ///
    /// Returns `false` when the build is no longer queued: another worker,
    /// possibly in another process, claimed it first.
    pub async fn claim(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE builds SET status = ?, started_at = ? WHERE id = ? AND status = ?",
        )
        .bind(BuildStatus::Progress.as_str())
        .bind(datetime_to_timestamp(started_at))
        .bind(id.to_string())
        .bind(BuildStatus::InQueue.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_finished(
        &self,
        id: Uuid,
        status: BuildStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE builds SET status = ?, finished_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(datetime_to_timestamp(finished_at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::BuildNotFound(id));
        }
        Ok(())
    }

    /// Overwrite a build's status without touching timestamps.
    pub async fn set_status(&self, id: Uuid, status: BuildStatus) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE builds SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::BuildNotFound(id));
        }
        Ok(())
    }

    pub async fn set_commit(&self, id: Uuid, commit: &CommitInfo) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE builds
            SET commit_hash = ?, author = ?, email = ?, committed_at = ?, commit_message = ?
            WHERE id = ?
            "#,
        )
        .bind(&commit.commit)
        .bind(&commit.author)
        .bind(&commit.email)
        .bind(datetime_to_timestamp(commit.committed_at))
        .bind(&commit.message)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the step at `position` of a build.
    pub async fn append_step(
        &self,
        build_id: Uuid,
        position: usize,
        step: &StepOutput,
    ) -> Result<(), DbError> {
        let row = StepRow::new(build_id, position, step)?;

        sqlx::query(
            r#"
            INSERT INTO build_steps (build_id, position, kind, command, stdout, exit_code)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.build_id)
        .bind(row.position)
        .bind(&row.kind)
        .bind(&row.command)
        .bind(&row.stdout)
        .bind(row.exit_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete every build of the project except the newest `keep`.
    /// Returns how many were removed.
    pub async fn delete_all_but_newest(&self, project_id: Uuid, keep: u32) -> Result<u64, DbError> {
        let result = sqlx::query(&format!(
            r#"
            DELETE FROM builds
            WHERE id IN (
                SELECT id FROM builds WHERE project_id = ? {} LIMIT -1 OFFSET ?
            )
            "#,
            NEWEST_FIRST
        ))
        .bind(project_id.to_string())
        .bind(i64::from(keep))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM builds WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn steps_for(&self, build_id: Uuid) -> Result<Vec<StepOutput>, DbError> {
        let rows: Vec<StepRow> = sqlx::query_as(
            r#"
            SELECT build_id, position, kind, command, stdout, exit_code
            FROM build_steps
            WHERE build_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(build_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }
}
