use std::sync::Arc;

use tracing::debug;

use crate::application::DocumentStore;
use crate::domain::{DocumentKind, DomainError, RepoOverview};

/// Lists a tenant's indexed repositories from their repo_summary documents.
pub struct ListRepositoriesUseCase {
    store: Arc<dyn DocumentStore>,
}

impl ListRepositoriesUseCase {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, tenant_id: &str) -> Result<Vec<RepoOverview>, DomainError> {
        let docs = self
            .store
            .list_by_kind(tenant_id, None, DocumentKind::RepoSummary)
            .await?;
        debug!("Tenant {} has {} repositories", tenant_id, docs.len());

        let mut repos: Vec<RepoOverview> = docs
            .into_iter()
            .map(|doc| RepoOverview {
                repo_id: doc.repo_id().to_string(),
                languages: doc.languages().map(<[String]>::to_vec).unwrap_or_default(),
                doc_counts: doc.doc_counts().cloned().unwrap_or_default(),
                summary_text: doc.summary_text().to_string(),
            })
            .collect();
        repos.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));
        Ok(repos)
    }
}
