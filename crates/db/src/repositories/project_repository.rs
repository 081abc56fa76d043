use crate::error::DbError;
use crate::models::ProjectRow;
use chrono::Utc;
use keelson_core::{workspace_name, Project, ValidationError};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

const PROJECT_COLUMNS: &str = "id, name, vcs_type, vcs_source, vcs_branch, steps, max_builds, total_builds, failed_builds, hook_name, position, created_at, updated_at";

#[derive(Clone)]
pub struct ProjectRepository {
    pool: SqlitePool,
}

impl ProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new project at the end of the project order. Counters always
    /// start at zero regardless of what `project` carries.
    pub async fn create(&self, project: &Project) -> Result<Project, DbError> {
        self.check_unique(project, None).await?;

        let (next_position,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(position), 0) + 1 FROM projects")
                .fetch_one(&self.pool)
                .await?;

        let mut created = project.clone();
        created.total_builds = 0;
        created.failed_builds = 0;
        created.position = next_position;
        let row = ProjectRow::from(&created);

        sqlx::query(
            r#"
            INSERT INTO projects (id, name, vcs_type, vcs_source, vcs_branch, steps, max_builds, total_builds, failed_builds, hook_name, position, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.vcs_type)
        .bind(&row.vcs_source)
        .bind(&row.vcs_branch)
        .bind(&row.steps)
        .bind(row.max_builds)
        .bind(row.total_builds)
        .bind(row.failed_builds)
        .bind(&row.hook_name)
        .bind(row.position)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unique_violation)?;

        debug!(project = %created.name, position = created.position, "Project inserted");
        Ok(created)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Project>, DbError> {
        let row: Option<ProjectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM projects WHERE id = ?",
            PROJECT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    pub async fn get(&self, id: Uuid) -> Result<Project, DbError> {
        self.find_by_id(id)
            .await?
            .ok_or(DbError::ProjectNotFound(id))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Project>, DbError> {
        let row: Option<ProjectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM projects WHERE name = ?",
            PROJECT_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    /// All projects in their display order.
    pub async fn find_all(&self) -> Result<Vec<Project>, DbError> {
        let rows: Vec<ProjectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM projects ORDER BY position ASC",
            PROJECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    /// Persist the editable fields of `project`. Counters and position are
    /// owned by the store and left untouched.
    pub async fn update(&self, project: &Project) -> Result<Project, DbError> {
        self.check_unique(project, Some(project.id)).await?;

        let mut updated = project.clone();
        updated.updated_at = Utc::now();
        let row = ProjectRow::from(&updated);

        let result = sqlx::query(
            r#"
            UPDATE projects
            SET name = ?, vcs_type = ?, vcs_source = ?, vcs_branch = ?, steps = ?, max_builds = ?, hook_name = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&row.name)
        .bind(&row.vcs_type)
        .bind(&row.vcs_source)
        .bind(&row.vcs_branch)
        .bind(&row.steps)
        .bind(row.max_builds)
        .bind(&row.hook_name)
        .bind(row.updated_at)
        .bind(&row.id)
        .execute(&self.pool)
        .await
        .map_err(unique_violation)?;

        if result.rows_affected() == 0 {
            return Err(DbError::ProjectNotFound(project.id));
        }

        self.get(project.id).await
    }

    /// Delete a project; its builds, steps and hooks go with it.
    pub async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        let (position,): (i64,) = match sqlx::query_as("SELECT position FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(row) => row,
            None => return Ok(false),
        };

        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE projects SET position = position - 1 WHERE position > ?")
            .bind(position)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn increment_failed_builds(&self, id: Uuid) -> Result<(), DbError> {
        let result =
            sqlx::query("UPDATE projects SET failed_builds = failed_builds + 1 WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::ProjectNotFound(id));
        }
        Ok(())
    }

    /// Move a project to `position` (1-based, clamped), shifting the projects
    /// in between by one.
    pub async fn move_to(&self, id: Uuid, position: i64) -> Result<Project, DbError> {
        let mut tx = self.pool.begin().await?;

        let (current,): (i64,) = sqlx::query_as("SELECT position FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::ProjectNotFound(id))?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM projects")
            .fetch_one(&mut *tx)
            .await?;
        let target = position.clamp(1, count.max(1));

        if target < current {
            sqlx::query(
                "UPDATE projects SET position = position + 1 WHERE position >= ? AND position < ?",
            )
            .bind(target)
            .bind(current)
            .execute(&mut *tx)
            .await?;
        } else if target > current {
            sqlx::query(
                "UPDATE projects SET position = position - 1 WHERE position > ? AND position <= ?",
            )
            .bind(current)
            .bind(target)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE projects SET position = ? WHERE id = ?")
            .bind(target)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.get(id).await
    }

    /// Reject `project` if another project (other than `exclude`) already
    /// uses its name, its hook name or its working directory.
    pub async fn check_unique(
        &self,
        project: &Project,
        exclude: Option<Uuid>,
    ) -> Result<(), DbError> {
        let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();

        let (names,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM projects WHERE name = ? AND id != ?")
                .bind(&project.name)
                .bind(&exclude)
                .fetch_one(&self.pool)
                .await?;
        if names > 0 {
            return Err(ValidationError::taken("name").into());
        }

        // Names differing only in case or punctuation share a directory.
        let others: Vec<(String,)> = sqlx::query_as("SELECT name FROM projects WHERE id != ?")
            .bind(&exclude)
            .fetch_all(&self.pool)
            .await?;
        let dir = project.workspace_name();
        if let Some((other,)) = others.iter().find(|(name,)| workspace_name(name) == dir) {
            return Err(ValidationError::new(
                "name",
                format!("uses the same working directory as project {}", other),
            )
            .into());
        }

        if let Some(hook_name) = &project.hook_name {
            let (hooks,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM projects WHERE hook_name = ? AND id != ?")
                    .bind(hook_name)
                    .bind(&exclude)
                    .fetch_one(&self.pool)
                    .await?;
            if hooks > 0 {
                return Err(ValidationError::taken("hook_name").into());
            }
        }

        Ok(())
    }
}

/// Map a UNIQUE constraint failure that slipped past the pre-check (a
/// concurrent insert) to the same validation error.
fn unique_violation(error: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.is_unique_violation() {
            let field = if db_error.message().contains("hook_name") {
                "hook_name"
            } else {
                "name"
            };
            return ValidationError::taken(field).into();
        }
    }
    error.into()
}
