use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::application::DocumentStore;
use crate::domain::{DomainError, FileChunks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    New,
    Updated,
}

/// File-granular change detection against the stored index.
///
/// Sits between the walker and the summarizer: unchanged files are dropped
/// before any LLM work, updated files get a cascade delete first, and paths
/// that vanished from the working tree are cascade-deleted at the end.
/// Reconciliation is deliberately file-granular; a file is fully
/// re-summarized even when a single symbol changed.
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    tenant_id: String,
    repo_id: String,
    stored: HashMap<String, String>,
    seen: HashSet<String>,
    unchanged: u64,
}

impl Reconciler {
    /// One bulk read: `{path → stored file_commit}` for the repo.
    pub async fn load(
        store: Arc<dyn DocumentStore>,
        tenant_id: impl Into<String>,
        repo_id: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let tenant_id = tenant_id.into();
        let repo_id = repo_id.into();
        let stored = store.get_file_commits(&tenant_id, &repo_id).await?;
        debug!(
            "Reconciler loaded {} stored file commits for {}/{}",
            stored.len(),
            tenant_id,
            repo_id
        );
        Ok(Self {
            store,
            tenant_id,
            repo_id,
            stored,
            seen: HashSet::new(),
            unchanged: 0,
        })
    }

    /// Decide whether a chunk group enters summarization.
    ///
    /// `None` means the file is unchanged and its chunks are dropped. For an
    /// updated file the stale file_index and symbol docs are cascade-deleted
    /// before the new chunks proceed.
    pub async fn admit(
        &mut self,
        group: &FileChunks,
    ) -> Result<Option<FileDisposition>, DomainError> {
        self.seen.insert(group.path().to_string());

        match self.stored.get(group.path()) {
            None => Ok(Some(FileDisposition::New)),
            Some(stored_commit) if stored_commit == group.file_commit() => {
                self.unchanged += 1;
                debug!("Unchanged file dropped: {}", group.path());
                Ok(None)
            }
            Some(_) => {
                let deleted = self
                    .store
                    .delete_by_file(&self.tenant_id, &self.repo_id, group.path())
                    .await?;
                debug!(
                    "Updated file {}: deleted {} stale documents",
                    group.path(),
                    deleted
                );
                Ok(Some(FileDisposition::Updated))
            }
        }
    }

    /// Paths stored but absent from the walked tree, in sorted order.
    pub fn deleted_paths(&self) -> Vec<String> {
        let mut deleted: Vec<String> = self
            .stored
            .keys()
            .filter(|path| !self.seen.contains(*path))
            .cloned()
            .collect();
        deleted.sort();
        deleted
    }

    /// Cascade-delete everything belonging to vanished paths. Returns the
    /// number of documents removed.
    pub async fn finish(&self) -> Result<u64, DomainError> {
        let deleted_paths = self.deleted_paths();
        let mut removed = 0u64;
        for path in &deleted_paths {
            removed += self
                .store
                .delete_by_file(&self.tenant_id, &self.repo_id, path)
                .await?;
        }
        if !deleted_paths.is_empty() {
            info!(
                "Reconciler removed {} documents for {} deleted files",
                removed,
                deleted_paths.len()
            );
        }
        Ok(removed)
    }

    pub fn unchanged_count(&self) -> u64 {
        self.unchanged
    }

    pub fn stored_count(&self) -> usize {
        self.stored.len()
    }
}
