use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{Document, DocumentKind, DomainError, HybridQuery, ScoredDocument};

/// Per-document accounting for a streamed write batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    succeeded: Vec<String>,
    failed: Vec<String>,
}

impl BatchOutcome {
    pub fn new(succeeded: Vec<String>, failed: Vec<String>) -> Self {
        Self { succeeded, failed }
    }

    pub fn all_succeeded(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            succeeded: ids.into_iter().collect(),
            failed: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> &[String] {
        &self.succeeded
    }

    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The storage adapter: typed upsert, subdocument mutation, bulk secondary-key
/// reads, cascading deletes, and hybrid pre-filtered vector search.
///
/// Implementations must treat each document upsert as atomic; a batch may
/// partially fail, reported through [`BatchOutcome`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Bulk upsert by id, atomic per document.
    async fn upsert_documents(&self, batch: &[Document]) -> Result<BatchOutcome, DomainError>;

    /// In-place embedding replace without rewriting the whole document.
    async fn mutate_embedding(&self, id: &str, vector: &[f32]) -> Result<(), DomainError>;

    /// One bulk read: `{path → stored file_commit}` for every file_index doc
    /// of `(tenant, repo)`. Used by the reconciler.
    async fn get_file_commits(
        &self,
        tenant_id: &str,
        repo_id: &str,
    ) -> Result<HashMap<String, String>, DomainError>;

    /// Cascade delete of a file_index doc and its symbol children.
    /// Returns the number of documents deleted.
    async fn delete_by_file(
        &self,
        tenant_id: &str,
        repo_id: &str,
        path: &str,
    ) -> Result<u64, DomainError>;

    /// Cascade delete of every document belonging to `(tenant, repo)`.
    async fn delete_by_repo(&self, tenant_id: &str, repo_id: &str) -> Result<u64, DomainError>;

    /// Delete specific documents by id (stale module pruning). Returns the
    /// number actually removed.
    async fn delete_documents(&self, ids: &[String]) -> Result<u64, DomainError>;

    /// Keyword-pre-filtered kNN: candidates must satisfy the keyword
    /// predicate (type, tenant, optional repo) before vector scoring.
    async fn hybrid_search(
        &self,
        query: &HybridQuery,
    ) -> Result<Vec<ScoredDocument>, DomainError>;

    async fn fetch_document(&self, id: &str) -> Result<Option<Document>, DomainError>;

    async fn fetch_children(&self, id: &str) -> Result<Vec<Document>, DomainError>;

    /// Bulk query by secondary key: all documents of one kind for a tenant,
    /// optionally narrowed to one repo.
    async fn list_by_kind(
        &self,
        tenant_id: &str,
        repo_id: Option<&str>,
        kind: DocumentKind,
    ) -> Result<Vec<Document>, DomainError>;
}
