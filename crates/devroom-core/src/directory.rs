//! Project directory: the external store that owns project records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use devroom_types::{FileTree, Project, ProjectId};
use tokio::sync::RwLock;

use crate::error::PersistenceError;

/// Resolves and updates persisted projects.
///
/// Implement this to back the core with another store without touching the
/// gateway or the dispatcher.
#[async_trait]
pub trait ProjectDirectory: Send + Sync + 'static {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, PersistenceError>;

    /// Overwrite the stored tree of `id` with `tree`.
    async fn persist_file_tree(&self, id: &ProjectId, tree: &FileTree) -> Result<(), PersistenceError>;

    /// Add collaborators; returns the updated project, or `None` if it does
    /// not exist.
    async fn add_members(
        &self,
        id: &ProjectId,
        user_ids: &[String],
    ) -> Result<Option<Project>, PersistenceError>;
}

/// Map-backed directory for tests and single-process development.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    projects: RwLock<HashMap<ProjectId, Project>>,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    lookups: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project: Project) {
        self.projects.write().await.insert(project.id.clone(), project);
    }

    /// Make every subsequent `persist_file_tree` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hold every subsequent `persist_file_tree` for `delay` before it lands.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `find_by_id` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of successful tree writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn stored_tree(&self, id: &ProjectId) -> Option<FileTree> {
        self.projects.read().await.get(id).map(|p| p.file_tree.clone())
    }
}

#[async_trait]
impl ProjectDirectory for InMemoryDirectory {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, PersistenceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn persist_file_tree(&self, id: &ProjectId, tree: &FileTree) -> Result<(), PersistenceError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Store("writes disabled".into()));
        }
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| PersistenceError::MissingProject(id.clone()))?;
        project.file_tree = tree.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_members(
        &self,
        id: &ProjectId,
        user_ids: &[String],
    ) -> Result<Option<Project>, PersistenceError> {
        let mut projects = self.projects.write().await;
        Ok(projects.get_mut(id).map(|project| {
            project.members.extend(user_ids.iter().cloned());
            project.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persist_replaces_stored_tree() {
        let dir = InMemoryDirectory::new();
        let id = ProjectId::generate();
        dir.insert(Project::new(id.clone(), "demo")).await;

        let mut tree = FileTree::new();
        tree.insert_file("index.js", "1");
        dir.persist_file_tree(&id, &tree).await.unwrap();

        assert_eq!(dir.stored_tree(&id).await, Some(tree));
        assert_eq!(dir.writes(), 1);
    }

    #[tokio::test]
    async fn persist_to_unknown_project_fails() {
        let dir = InMemoryDirectory::new();
        let err = dir
            .persist_file_tree(&ProjectId::generate(), &FileTree::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::MissingProject(_)));
    }

    #[tokio::test]
    async fn add_members_is_idempotent() {
        let dir = InMemoryDirectory::new();
        let id = ProjectId::generate();
        dir.insert(Project::new(id.clone(), "demo")).await;

        dir.add_members(&id, &["u1".into(), "u2".into()]).await.unwrap();
        let project = dir.add_members(&id, &["u1".into()]).await.unwrap().unwrap();
        assert_eq!(project.members.len(), 2);

        assert!(dir.add_members(&ProjectId::generate(), &[]).await.unwrap().is_none());
    }
}
