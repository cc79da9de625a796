//! Collaborative file tree state and its background persister.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use devroom_types::{FileTree, ProjectId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

use crate::directory::ProjectDirectory;

/// Rejection of a single-file write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("file path must not be empty")]
    Empty,
    #[error("file path must not contain NUL")]
    Nul,
}

/// Validate a client-supplied path.
pub fn check_path(path: &str) -> Result<(), PathError> {
    if path.trim().is_empty() {
        return Err(PathError::Empty);
    }
    if path.contains('\0') {
        return Err(PathError::Nul);
    }
    Ok(())
}

/// In-memory tree of one live room.
///
/// Every write bumps `version` and hands a snapshot to the persister, if the
/// room is backed by a stored project.
pub struct FileTreeState {
    tree: Arc<FileTree>,
    version: u64,
    persister: Option<TreePersister>,
}

impl FileTreeState {
    /// State seeded from the stored tree of `project_id`, persisting through
    /// `directory`.
    pub fn seeded(project_id: ProjectId, tree: FileTree, directory: Arc<dyn ProjectDirectory>) -> Self {
        Self {
            tree: Arc::new(tree),
            version: 0,
            persister: Some(TreePersister::spawn(project_id, directory)),
        }
    }

    /// State with nowhere to persist (room admitted without a stored project).
    pub fn detached(tree: FileTree) -> Self {
        Self {
            tree: Arc::new(tree),
            version: 0,
            persister: None,
        }
    }

    pub fn snapshot(&self) -> Arc<FileTree> {
        Arc::clone(&self.tree)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// True once the persister has attempted the current version, or if there
    /// is nothing to persist to.
    pub fn is_settled(&self) -> bool {
        self.persister
            .as_ref()
            .is_none_or(|persister| persister.attempted() >= self.version)
    }

    /// Replace the contents at `path`.
    pub fn write_file(&mut self, path: &str, contents: &str) -> Result<(), PathError> {
        check_path(path)?;
        Arc::make_mut(&mut self.tree).insert_file(path, contents);
        self.committed();
        Ok(())
    }

    /// Replace the whole tree.
    pub fn replace(&mut self, tree: FileTree) {
        self.tree = Arc::new(tree);
        self.committed();
    }

    /// Stop accepting writes and wait until the last snapshot is stored.
    pub async fn close(self) {
        if let Some(persister) = self.persister {
            persister.close().await;
        }
    }

    fn committed(&mut self) {
        self.version += 1;
        if let Some(persister) = &self.persister {
            persister.submit(self.version, self.snapshot());
        }
    }
}

type Pending = Option<(u64, Arc<FileTree>)>;

/// Per-room writer that stores tree snapshots one at a time.
///
/// Snapshots submitted while a write is in flight are coalesced: only the
/// newest is written next, so the store always ends at the latest state.
pub struct TreePersister {
    tx: watch::Sender<Pending>,
    worker: JoinHandle<()>,
    /// Highest version whose write has finished, successfully or not.
    attempted: Arc<AtomicU64>,
}

impl TreePersister {
    pub fn spawn(project_id: ProjectId, directory: Arc<dyn ProjectDirectory>) -> Self {
        let (tx, rx) = watch::channel(None);
        let attempted = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(Self::run(project_id, directory, rx, Arc::clone(&attempted)).in_current_span());
        Self { tx, worker, attempted }
    }

    pub fn submit(&self, version: u64, tree: Arc<FileTree>) {
        self.tx.send_replace(Some((version, tree)));
    }

    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Acquire)
    }

    /// Drop the sender and wait for the worker to drain.
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }

    async fn run(
        project_id: ProjectId,
        directory: Arc<dyn ProjectDirectory>,
        mut rx: watch::Receiver<Pending>,
        attempted: Arc<AtomicU64>,
    ) {
        // Yields every unseen value, including one sent right before close.
        while rx.changed().await.is_ok() {
            let Some((version, tree)) = rx.borrow_and_update().clone() else {
                continue;
            };
            match directory.persist_file_tree(&project_id, &tree).await {
                Ok(()) => debug!(project = %project_id, version, "file tree persisted"),
                Err(e) => warn!(project = %project_id, version, error = %e, "failed to persist file tree"),
            }
            attempted.fetch_max(version, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::directory::InMemoryDirectory;
    use devroom_types::Project;
    use tracing_test::traced_test;

    async fn stored(project_id: &ProjectId) -> (Arc<InMemoryDirectory>, FileTreeState) {
        let dir = Arc::new(InMemoryDirectory::new());
        let mut project = Project::new(project_id.clone(), "demo");
        project.file_tree.insert_file("index.js", "0");
        dir.insert(project.clone()).await;
        let state = FileTreeState::seeded(project_id.clone(), project.file_tree, dir.clone());
        (dir, state)
    }

    #[test]
    fn path_rules() {
        assert_eq!(check_path(""), Err(PathError::Empty));
        assert_eq!(check_path("  "), Err(PathError::Empty));
        assert_eq!(check_path("a\0b"), Err(PathError::Nul));
        assert!(check_path("src/app.js").is_ok());
    }

    #[tokio::test]
    async fn last_write_is_persisted() {
        let id = ProjectId::generate();
        let (dir, mut state) = stored(&id).await;

        for i in 1..=20 {
            state.write_file("index.js", &i.to_string()).unwrap();
        }
        assert_eq!(state.version(), 20);
        state.close().await;

        let tree = dir.stored_tree(&id).await.unwrap();
        assert_eq!(tree.contents("index.js"), Some("20"));
        assert!(dir.writes() >= 1 && dir.writes() <= 20);
    }

    #[tokio::test]
    async fn replace_drops_old_paths() {
        let id = ProjectId::generate();
        let (dir, mut state) = stored(&id).await;

        let mut next = FileTree::new();
        next.insert_file("app.js", "x");
        state.replace(next.clone());
        assert_eq!(*state.snapshot(), next);
        state.close().await;

        assert_eq!(dir.stored_tree(&id).await, Some(next));
    }

    #[tokio::test]
    async fn settles_once_latest_write_finishes() {
        let id = ProjectId::generate();
        let (dir, mut state) = stored(&id).await;
        assert!(state.is_settled());
        dir.set_write_delay(Duration::from_millis(50));

        state.write_file("index.js", "1").unwrap();
        assert!(!state.is_settled());
        for _ in 0..100 {
            if state.is_settled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.is_settled());
        assert_eq!(dir.stored_tree(&id).await.unwrap().contents("index.js"), Some("1"));
        assert!(FileTreeState::detached(FileTree::new()).is_settled());
    }

    #[tokio::test]
    async fn rejected_path_does_not_bump_version() {
        let mut state = FileTreeState::detached(FileTree::new());
        assert!(state.write_file("", "x").is_err());
        assert_eq!(state.version(), 0);
        assert!(state.snapshot().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn persist_failure_is_logged_and_kept_in_memory() {
        let id = ProjectId::generate();
        let (dir, mut state) = stored(&id).await;
        dir.set_fail_writes(true);

        state.write_file("index.js", "new").unwrap();
        assert_eq!(state.snapshot().contents("index.js"), Some("new"));
        state.close().await;

        assert!(logs_contain("failed to persist file tree"));
        assert_eq!(dir.stored_tree(&id).await.unwrap().contents("index.js"), Some("0"));
    }
}
