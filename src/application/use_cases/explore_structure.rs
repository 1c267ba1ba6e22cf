use std::sync::Arc;

use crate::application::DocumentStore;
use crate::domain::{
    module_doc_id, DocumentKind, DocumentMeta, DomainError, StructureFile, StructureView,
};

/// Folder-level navigation synthesized from module_summary and file_index
/// documents under a path.
pub struct ExploreStructureUseCase {
    store: Arc<dyn DocumentStore>,
}

impl ExploreStructureUseCase {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        tenant_id: &str,
        repo_id: &str,
        path: &str,
    ) -> Result<StructureView, DomainError> {
        let normalized = path.trim_matches('/');
        let module_id = module_doc_id(tenant_id, repo_id, normalized);

        let module = self
            .store
            .fetch_document(&module_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "No module at '{}' in {}/{}",
                    normalized, tenant_id, repo_id
                ))
            })?;

        let children = self.store.fetch_children(&module_id).await?;

        let mut directories = Vec::new();
        let mut files = Vec::new();
        for child in children {
            match child.meta() {
                DocumentMeta::Module { path } => directories.push(path.clone()),
                DocumentMeta::File {
                    path,
                    language,
                    line_count,
                    ..
                } => files.push(StructureFile {
                    path: path.clone(),
                    language: *language,
                    line_count: *line_count,
                }),
                _ => {}
            }
        }
        directories.sort();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        debug_assert_eq!(module.kind(), DocumentKind::ModuleSummary);
        Ok(StructureView {
            path: normalized.to_string(),
            directories,
            files,
            summary: Some(module.summary_text().to_string()).filter(|s| !s.is_empty()),
        })
    }
}
