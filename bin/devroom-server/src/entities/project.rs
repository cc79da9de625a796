use std::collections::BTreeSet;
use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use devroom_core::{PersistenceError, ProjectDirectory};
use devroom_types::{FileTree, Project, ProjectId};

use crate::entities::SqliteStore;

/// Project operations used by the REST routes only.
pub trait ProjectStore: Send + Sync + 'static {
    /// Insert a project owned by `owner`. Fails with a unique-constraint error
    /// if the name is taken.
    fn create_project(&self, name: &str, owner: &str) -> impl Future<Output = Result<Project, sqlx::Error>> + Send;

    /// Projects `user_id` collaborates on, by name.
    fn list_for_user(&self, user_id: &str) -> impl Future<Output = Result<Vec<Project>, sqlx::Error>> + Send;
}

impl SqliteStore {
    async fn members(&self, id: &str) -> Result<BTreeSet<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT user_id FROM project_members WHERE project_id = ?1")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(user,)| user).collect())
    }

    async fn load(&self, id: &ProjectId) -> Result<Option<Project>, PersistenceError> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, name, file_tree FROM projects WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;
        let Some((raw_id, name, tree)) = row else {
            return Ok(None);
        };
        let members = self.members(&raw_id).await.map_err(store_error)?;
        Ok(Some(Project {
            id: id.clone(),
            name,
            members,
            file_tree: decode_tree(&tree)?,
        }))
    }
}

impl ProjectStore for SqliteStore {
    async fn create_project(&self, name: &str, owner: &str) -> Result<Project, sqlx::Error> {
        let id = ProjectId::generate();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO projects (id, name, file_tree, created_at, updated_at) \
             VALUES (?1, ?2, '{}', ?3, ?3)",
        )
        .bind(id.as_str())
        .bind(name)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO project_members (project_id, user_id) VALUES (?1, ?2)")
            .bind(id.as_str())
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut project = Project::new(id, name);
        project.members.insert(owner.to_owned());
        Ok(project)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Project>, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT p.id, p.name FROM projects p \
             JOIN project_members m ON m.project_id = p.id \
             WHERE m.user_id = ?1 ORDER BY p.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut projects = Vec::with_capacity(rows.len());
        for (id, name) in rows {
            let members = self.members(&id).await?;
            let Ok(id) = ProjectId::parse(&id) else {
                tracing::warn!(%id, "skipping project with malformed id");
                continue;
            };
            let mut project = Project::new(id, name);
            project.members = members;
            projects.push(project);
        }
        Ok(projects)
    }
}

#[async_trait]
impl ProjectDirectory for SqliteStore {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, PersistenceError> {
        self.load(id).await
    }

    async fn persist_file_tree(&self, id: &ProjectId, tree: &FileTree) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_string(tree).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        let result = sqlx::query("UPDATE projects SET file_tree = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&encoded)
            .bind(Utc::now().to_rfc3339())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::MissingProject(id.clone()));
        }
        Ok(())
    }

    async fn add_members(
        &self,
        id: &ProjectId,
        user_ids: &[String],
    ) -> Result<Option<Project>, PersistenceError> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM projects WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        if exists.is_none() {
            return Ok(None);
        }
        for user in user_ids {
            sqlx::query("INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?1, ?2)")
                .bind(id.as_str())
                .bind(user)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
        }
        self.load(id).await
    }
}

fn store_error(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Store(e.to_string())
}

fn decode_tree(raw: &str) -> Result<FileTree, PersistenceError> {
    serde_json::from_str(raw).map_err(|e| PersistenceError::Corrupt(e.to_string()))
}
