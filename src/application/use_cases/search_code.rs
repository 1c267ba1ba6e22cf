use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::application::pipeline::EmbeddingBatcher;
use crate::application::{DocumentStore, EmbeddingService};
use crate::domain::{
    DomainError, EngineConfig, HybridQuery, ScoredDocument, SearchHit, SearchLevel,
    SearchRequest, MIN_SUMMARY_BYTES,
};

/// Hybrid retrieval: intent-routed level, query embedding, keyword
/// pre-filtered kNN against the store, and a defensive post-filter.
pub struct SearchCodeUseCase {
    store: Arc<dyn DocumentStore>,
    batcher: Arc<EmbeddingBatcher>,
    config: Arc<EngineConfig>,
}

impl SearchCodeUseCase {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedding: Arc<dyn EmbeddingService>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            batcher: Arc::new(EmbeddingBatcher::new(embedding, Arc::clone(&config))),
            config,
        }
    }

    pub async fn execute(&self, request: SearchRequest) -> Result<Vec<SearchHit>, DomainError> {
        let started = Instant::now();

        let level = request
            .level()
            .unwrap_or_else(|| classify_intent(request.query_text()));
        let kind = level.document_kind();
        info!(
            "Searching tenant={} level={} query=\"{}\"",
            request.tenant_id(),
            level,
            request.query_text()
        );

        let query_vector = self.batcher.encode_query(request.query_text()).await?;

        let k = request.limit() * self.config.oversample.max(1);
        let hybrid = HybridQuery::new(
            request.tenant_id(),
            kind,
            request.repo_filter().map(String::from),
            query_vector,
            k,
        );

        let candidates = self.search_with_retry(&hybrid).await?;
        debug!("Store returned {} candidates", candidates.len());

        // Defensive post-filter: the engine was asked to pre-filter, but a
        // result disagreeing on type or tenant must never leak out.
        let preview = request
            .preview_mode()
            .then_some(self.config.preview_chars);
        let hits: Vec<SearchHit> = candidates
            .iter()
            .filter(|scored| {
                let doc = scored.document();
                doc.kind() == kind
                    && doc.tenant_id() == request.tenant_id()
                    && request
                        .repo_filter()
                        .map_or(true, |repo| doc.repo_id() == repo)
                    && doc.summary_text().len() >= MIN_SUMMARY_BYTES
            })
            .take(request.limit())
            .map(|scored| SearchHit::from_scored(scored, preview))
            .collect();

        info!(
            "Found {} results in {:.3}s",
            hits.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(hits)
    }

    /// One retry on a transient store error, then `SearchUnavailable`.
    /// `IndexUnavailable` surfaces untouched; empty results are not errors.
    async fn search_with_retry(
        &self,
        query: &HybridQuery,
    ) -> Result<Vec<ScoredDocument>, DomainError> {
        match self.store.hybrid_search(query).await {
            Ok(results) => Ok(results),
            Err(e @ DomainError::IndexUnavailable(_)) => Err(e),
            Err(e) if e.is_transient() => {
                warn!("Hybrid search failed once ({}); retrying", e);
                self.store
                    .hybrid_search(query)
                    .await
                    .map_err(|e| DomainError::search_unavailable(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Heuristic intent classification for queries without an explicit level.
/// The default when nothing matches is `file`.
pub fn classify_intent(query_text: &str) -> SearchLevel {
    let lowered = query_text.to_lowercase();
    let has = |needle: &str| lowered.contains(needle);

    if has("overview")
        || has("architecture")
        || has("what is this repo")
        || has("what does this repo")
        || has("whole project")
    {
        return SearchLevel::Repo;
    }

    if has("find function")
        || has("find method")
        || has("find class")
        || has("function named")
        || has("method named")
        || has("class named")
        || has("definition of")
        || has("where is the function")
        || has("signature")
    {
        return SearchLevel::Symbol;
    }

    if has("concept") || has("documentation") || has("docs about") || has("design of") {
        return SearchLevel::Doc;
    }

    if has("which module") || has("which folder") || has("which package") || has("subsystem") {
        return SearchLevel::Module;
    }

    SearchLevel::File
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_defaults_to_file() {
        assert_eq!(classify_intent("how does ingestion work"), SearchLevel::File);
        assert_eq!(classify_intent("retry logic"), SearchLevel::File);
    }

    #[test]
    fn test_intent_symbol_queries() {
        assert_eq!(
            classify_intent("find function parse_config"),
            SearchLevel::Symbol
        );
        assert_eq!(
            classify_intent("where is the definition of Walker"),
            SearchLevel::Symbol
        );
    }

    #[test]
    fn test_intent_repo_and_module_queries() {
        assert_eq!(
            classify_intent("give me an overview of the project"),
            SearchLevel::Repo
        );
        assert_eq!(
            classify_intent("which module handles auth"),
            SearchLevel::Module
        );
        assert_eq!(
            classify_intent("documentation about caching"),
            SearchLevel::Doc
        );
    }
}
