use std::sync::Arc;

use tracing::info;

use crate::application::DocumentStore;
use crate::domain::DomainError;

/// Explicit repo removal: cascades every document keyed on `repo_id`.
pub struct DeleteRepositoryUseCase {
    store: Arc<dyn DocumentStore>,
}

impl DeleteRepositoryUseCase {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, tenant_id: &str, repo_id: &str) -> Result<u64, DomainError> {
        let deleted = self.store.delete_by_repo(tenant_id, repo_id).await?;
        if deleted == 0 {
            return Err(DomainError::not_found(format!(
                "Repository {}/{} is not indexed",
                tenant_id, repo_id
            )));
        }
        info!(
            "Deleted repository {}/{} ({} documents)",
            tenant_id, repo_id, deleted
        );
        Ok(deleted)
    }
}
