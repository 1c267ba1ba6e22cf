use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::{BatchOutcome, DocumentStore};
use crate::domain::{
    Document, DocumentKind, DomainError, HybridQuery, ScoredDocument,
};

/// In-memory document store with pre-filtered kNN over unit vectors.
///
/// The default backend for local runs and the backbone of the test suite.
/// Mirrors the contract of the FTS-backed store: the keyword predicate is
/// applied before vector scoring, dot product is the similarity, cascades
/// follow the hierarchy.
pub struct MemoryDocumentStore {
    documents: Arc<Mutex<HashMap<String, Document>>>,
    fail_searches: AtomicU32,
    index_missing: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(Mutex::new(HashMap::new())),
            fail_searches: AtomicU32::new(0),
            index_missing: AtomicBool::new(false),
        }
    }

    /// Make the next `n` hybrid searches fail with a transient error.
    pub fn inject_transient_search_failures(&self, n: u32) {
        self.fail_searches.store(n, Ordering::SeqCst);
    }

    /// Simulate a missing search index.
    pub fn set_index_missing(&self, missing: bool) {
        self.index_missing.store(missing, Ordering::SeqCst);
    }

    pub async fn document_count(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn all_documents(&self) -> Vec<Document> {
        self.documents.lock().await.values().cloned().collect()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert_documents(&self, batch: &[Document]) -> Result<BatchOutcome, DomainError> {
        let mut store = self.documents.lock().await;
        let mut ids = Vec::with_capacity(batch.len());
        for doc in batch {
            let mut doc = doc.clone();
            doc.touch();
            ids.push(doc.id().to_string());
            store.insert(doc.id().to_string(), doc);
        }
        debug!("Upserted {} documents in memory", ids.len());
        Ok(BatchOutcome::all_succeeded(ids))
    }

    async fn mutate_embedding(&self, id: &str, vector: &[f32]) -> Result<(), DomainError> {
        let mut store = self.documents.lock().await;
        let doc = store
            .get_mut(id)
            .ok_or_else(|| DomainError::not_found(format!("Document {}", id)))?;
        doc.set_embedding(vector.to_vec());
        doc.touch();
        Ok(())
    }

    async fn get_file_commits(
        &self,
        tenant_id: &str,
        repo_id: &str,
    ) -> Result<HashMap<String, String>, DomainError> {
        let store = self.documents.lock().await;
        Ok(store
            .values()
            .filter(|d| {
                d.kind() == DocumentKind::FileIndex
                    && d.tenant_id() == tenant_id
                    && d.repo_id() == repo_id
            })
            .filter_map(|d| {
                Some((d.path()?.to_string(), d.file_commit()?.to_string()))
            })
            .collect())
    }

    async fn delete_by_file(
        &self,
        tenant_id: &str,
        repo_id: &str,
        path: &str,
    ) -> Result<u64, DomainError> {
        let mut store = self.documents.lock().await;
        let victims: Vec<String> = store
            .values()
            .filter(|d| {
                d.tenant_id() == tenant_id
                    && d.repo_id() == repo_id
                    && matches!(
                        d.kind(),
                        DocumentKind::FileIndex | DocumentKind::SymbolIndex
                    )
                    && d.path() == Some(path)
            })
            .map(|d| d.id().to_string())
            .collect();
        for id in &victims {
            store.remove(id);
        }
        Ok(victims.len() as u64)
    }

    async fn delete_by_repo(&self, tenant_id: &str, repo_id: &str) -> Result<u64, DomainError> {
        let mut store = self.documents.lock().await;
        let victims: Vec<String> = store
            .values()
            .filter(|d| d.tenant_id() == tenant_id && d.repo_id() == repo_id)
            .map(|d| d.id().to_string())
            .collect();
        for id in &victims {
            store.remove(id);
        }
        Ok(victims.len() as u64)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<u64, DomainError> {
        let mut store = self.documents.lock().await;
        let mut removed = 0u64;
        for id in ids {
            if store.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn hybrid_search(
        &self,
        query: &HybridQuery,
    ) -> Result<Vec<ScoredDocument>, DomainError> {
        if self.index_missing.load(Ordering::SeqCst) {
            return Err(DomainError::index_unavailable("documents index absent"));
        }
        if self.fail_searches.load(Ordering::SeqCst) > 0 {
            self.fail_searches.fetch_sub(1, Ordering::SeqCst);
            return Err(DomainError::storage("injected transient search failure"));
        }

        let store = self.documents.lock().await;

        // Pre-filter semantics: the keyword predicate gates candidacy before
        // any vector scoring happens.
        let mut scored: Vec<ScoredDocument> = store
            .values()
            .filter(|d| {
                d.kind() == query.kind()
                    && d.tenant_id() == query.tenant_id()
                    && query.repo_id().map_or(true, |repo| d.repo_id() == repo)
            })
            .filter_map(|d| {
                let embedding = d.embedding()?;
                let score = dot_product(query.query_vector(), embedding);
                Some(ScoredDocument::new(d.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(query.k());
        Ok(scored)
    }

    async fn fetch_document(&self, id: &str) -> Result<Option<Document>, DomainError> {
        let store = self.documents.lock().await;
        Ok(store.get(id).cloned())
    }

    async fn fetch_children(&self, id: &str) -> Result<Vec<Document>, DomainError> {
        let store = self.documents.lock().await;
        let mut children: Vec<Document> = store
            .values()
            .filter(|d| d.parent_id() == Some(id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(children)
    }

    async fn list_by_kind(
        &self,
        tenant_id: &str,
        repo_id: Option<&str>,
        kind: DocumentKind,
    ) -> Result<Vec<Document>, DomainError> {
        let store = self.documents.lock().await;
        let mut docs: Vec<Document> = store
            .values()
            .filter(|d| {
                d.kind() == kind
                    && d.tenant_id() == tenant_id
                    && repo_id.map_or(true, |repo| d.repo_id() == repo)
            })
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Language, SymbolKind};

    fn unit_vector(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot % dims] = 1.0;
        v
    }

    fn file_doc(tenant: &str, repo: &str, path: &str, hot: usize) -> Document {
        let mut doc = Document::file_index(tenant, repo, path, Language::Python, 10, "commit")
            .with_summary("a summary long enough to clear the minimum content length filter");
        doc.set_embedding(unit_vector(8, hot));
        doc
    }

    #[tokio::test]
    async fn test_upsert_and_fetch() {
        let store = MemoryDocumentStore::new();
        let doc = file_doc("t", "r", "a.py", 0);
        let id = doc.id().to_string();
        let outcome = store.upsert_documents(&[doc]).await.unwrap();
        assert!(outcome.is_complete());
        assert!(store.fetch_document(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_by_file_cascades_symbols() {
        let store = MemoryDocumentStore::new();
        let file = file_doc("t", "r", "a.py", 0);
        let mut symbol = Document::symbol_index(
            "t", "r", "a.py", "f", SymbolKind::Function, 1, 6, None,
        )
        .with_summary("symbol summary long enough to clear the length filter..");
        symbol.set_embedding(unit_vector(8, 1));
        let other = file_doc("t", "r", "b.py", 2);

        store
            .upsert_documents(&[file, symbol, other])
            .await
            .unwrap();
        let deleted = store.delete_by_file("t", "r", "a.py").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.document_count().await, 1);
    }

    #[tokio::test]
    async fn test_hybrid_search_pre_filters_by_tenant_and_kind() {
        let store = MemoryDocumentStore::new();
        store
            .upsert_documents(&[
                file_doc("tenant-a", "r", "a.py", 0),
                file_doc("tenant-b", "r", "b.py", 0),
            ])
            .await
            .unwrap();

        let query = HybridQuery::new(
            "tenant-a",
            DocumentKind::FileIndex,
            None,
            unit_vector(8, 0),
            10,
        );
        let hits = store.hybrid_search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document().tenant_id(), "tenant-a");
        assert!(hits[0].score() > 0.99);
    }

    #[tokio::test]
    async fn test_index_missing_surfaces_typed_error() {
        let store = MemoryDocumentStore::new();
        store.set_index_missing(true);
        let query = HybridQuery::new("t", DocumentKind::FileIndex, None, unit_vector(8, 0), 5);
        let err = store.hybrid_search(&query).await.unwrap_err();
        assert!(matches!(err, DomainError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn test_get_file_commits_bulk_read() {
        let store = MemoryDocumentStore::new();
        store
            .upsert_documents(&[file_doc("t", "r", "a.py", 0), file_doc("t", "r", "b.py", 1)])
            .await
            .unwrap();
        let commits = store.get_file_commits("t", "r").await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits.get("a.py").map(String::as_str), Some("commit"));
    }
}
