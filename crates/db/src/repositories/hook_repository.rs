use crate::error::DbError;
use crate::models::HookRow;
use keelson_core::{Hook, HookChanges};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct HookRepository {
    pool: SqlitePool,
}

impl HookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Hook>, DbError> {
        let rows: Vec<HookRow> = sqlx::query_as(
            "SELECT id, project_id, hook_name FROM hooks WHERE project_id = ? ORDER BY hook_name ASC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    pub async fn names(&self, project_id: Uuid) -> Result<Vec<String>, DbError> {
        Ok(self
            .find_by_project(project_id)
            .await?
            .into_iter()
            .map(|hook| hook.hook_name)
            .collect())
    }

    /// Make the project's hooks equal to `requested`, removing stale ones and
    /// adding new ones in a single transaction.
    pub async fn reconcile(
        &self,
        project_id: Uuid,
        requested: &[String],
    ) -> Result<HookChanges, DbError> {
        let mut tx = self.pool.begin().await?;

        let current: Vec<(String,)> =
            sqlx::query_as("SELECT hook_name FROM hooks WHERE project_id = ?")
                .bind(project_id.to_string())
                .fetch_all(&mut *tx)
                .await?;
        let changes = HookChanges::between(current.into_iter().map(|(name,)| name), requested);

        for name in &changes.to_remove {
            sqlx::query("DELETE FROM hooks WHERE project_id = ? AND hook_name = ?")
                .bind(project_id.to_string())
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        for name in &changes.to_add {
            let hook = Hook::new(project_id, name.clone());
            sqlx::query("INSERT INTO hooks (id, project_id, hook_name) VALUES (?, ?, ?)")
                .bind(hook.id.to_string())
                .bind(hook.project_id.to_string())
                .bind(&hook.hook_name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        if !changes.is_empty() {
            debug!(
                project_id = %project_id,
                added = changes.to_add.len(),
                removed = changes.to_remove.len(),
                "Hooks reconciled"
            );
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, ProjectRepository};
    use keelson_core::{Project, VcsDescriptor};

    async fn setup() -> (HookRepository, ProjectRepository, Project) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let projects = ProjectRepository::new(pool.clone());
        let project = projects
            .create(&Project::new(
                "Project",
                VcsDescriptor::new("git", "test/files/repo", "master"),
            ))
            .await
            .unwrap();
        (HookRepository::new(pool), projects, project)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reconcile_adds_and_removes() {
        let (repo, _, project) = setup().await;

        let changes = repo
            .reconcile(project.id, &names(&["mailer", "irc"]))
            .await
            .unwrap();
        assert_eq!(changes.to_add, vec!["irc", "mailer"]);
        assert!(changes.to_remove.is_empty());

        let changes = repo
            .reconcile(project.id, &names(&["irc", "webhook"]))
            .await
            .unwrap();
        assert_eq!(changes.to_add, vec!["webhook"]);
        assert_eq!(changes.to_remove, vec!["mailer"]);

        assert_eq!(repo.names(project.id).await.unwrap(), vec!["irc", "webhook"]);
    }

    #[tokio::test]
    async fn test_reconcile_same_set_is_noop() {
        let (repo, _, project) = setup().await;
        repo.reconcile(project.id, &names(&["irc"])).await.unwrap();

        let changes = repo.reconcile(project.id, &names(&["irc"])).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_hooks_removed_with_project() {
        let (repo, projects, project) = setup().await;
        repo.reconcile(project.id, &names(&["irc"])).await.unwrap();

        projects.delete(project.id).await.unwrap();
        assert!(repo.find_by_project(project.id).await.unwrap().is_empty());
    }
}
