//! Retrieval tests: hybrid search over ingested fixtures, tenant isolation,
//! level routing, and the search failure policy.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use codesmriti::{
    DocumentKind, DocumentStore, DomainError, EngineConfig, IngestRepositoryUseCase, JobKind,
    MemoryDocumentStore, MockChatClient, MockEmbedding, NoopProgress, SearchCodeUseCase,
    SearchLevel, SearchRequest, TreeSitterChunker,
};

const UTIL_PY: &str = r#""""Small arithmetic helpers."""


def add(a, b):
    """Add two numbers together.

    Returns the arithmetic sum of both operands.
    """
    return a + b


def sub(a, b):
    """Subtract two numbers.

    Returns the arithmetic difference of both operands.
    """
    return a - b
"#;

const PARSER_PY: &str = r#""""Configuration parsing."""


def parse_config(path):
    """Parse a yaml configuration file.

    Loads the file from disk and validates the recognized options.
    """
    return {"path": path}
"#;

struct SearchEnv {
    store: Arc<MemoryDocumentStore>,
    search: SearchCodeUseCase,
    ingest: IngestRepositoryUseCase,
}

fn setup_env() -> SearchEnv {
    let config = Arc::new(EngineConfig::default());
    let store = Arc::new(MemoryDocumentStore::new());
    let embedding = Arc::new(MockEmbedding::with_dimensions(config.embed_dims));
    let ingest = IngestRepositoryUseCase::new(
        store.clone(),
        Arc::new(TreeSitterChunker::new()),
        Arc::new(MockChatClient::new()),
        embedding.clone(),
        config.clone(),
    );
    let search = SearchCodeUseCase::new(store.clone(), embedding, config);
    SearchEnv {
        store,
        search,
        ingest,
    }
}

async fn ingest(env: &SearchEnv, dir: &Path, tenant: &str, repo: &str) {
    env.ingest
        .execute(
            tenant,
            repo,
            dir,
            JobKind::Incremental,
            CancellationToken::new(),
            Arc::new(NoopProgress),
        )
        .await
        .expect("ingestion failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_symbol_query_finds_sub() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let hits = env
        .search
        .execute(
            SearchRequest::new("acme", "subtract two numbers")
                .with_level(SearchLevel::Symbol)
                .with_limit(1),
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].symbol_name(), Some("sub"));
    assert_eq!(hits[0].kind(), DocumentKind::SymbolIndex);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_self_retrieval_returns_rank_one_with_high_score() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    for kind in [
        DocumentKind::SymbolIndex,
        DocumentKind::FileIndex,
        DocumentKind::ModuleSummary,
        DocumentKind::RepoSummary,
    ] {
        let docs = env
            .store
            .list_by_kind("acme", Some("owner/repo"), kind)
            .await
            .unwrap();
        for doc in docs {
            let level = match kind {
                DocumentKind::SymbolIndex => SearchLevel::Symbol,
                DocumentKind::FileIndex => SearchLevel::File,
                DocumentKind::ModuleSummary => SearchLevel::Module,
                DocumentKind::RepoSummary => SearchLevel::Repo,
            };
            let hits = env
                .search
                .execute(
                    SearchRequest::new("acme", doc.summary_text())
                        .with_level(level)
                        .with_limit(3),
                )
                .await
                .unwrap();
            assert!(!hits.is_empty(), "no hits for {}", doc.id());
            assert_eq!(hits[0].id(), doc.id(), "self-retrieval missed rank 1");
            assert!(
                hits[0].score() >= 0.99,
                "self-retrieval score {} for {}",
                hits[0].score(),
                doc.id()
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tenant_isolation() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    std::fs::write(dir_a.path().join("util.py"), UTIL_PY).unwrap();
    std::fs::write(dir_b.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir_a.path(), "tenant-a", "repo-a").await;
    ingest(&env, dir_b.path(), "tenant-b", "repo-b").await;

    let hits = env
        .search
        .execute(
            SearchRequest::new("tenant-a", "arithmetic helpers")
                .with_level(SearchLevel::File)
                .with_limit(10),
        )
        .await
        .unwrap();

    assert!(!hits.is_empty());
    for hit in hits {
        assert_eq!(hit.repo_id(), "repo-a");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repo_filter_prevents_cross_repo_leakage() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    std::fs::write(dir_a.path().join("util.py"), UTIL_PY).unwrap();
    std::fs::write(dir_b.path().join("parser.py"), PARSER_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir_a.path(), "acme", "owner/repo").await;
    ingest(&env, dir_b.path(), "acme", "owner/other").await;

    let hits = env
        .search
        .execute(
            SearchRequest::new("acme", "helpers and parsing")
                .with_level(SearchLevel::File)
                .with_repo_filter("owner/repo")
                .with_limit(10),
        )
        .await
        .unwrap();

    assert!(!hits.is_empty());
    for hit in hits {
        assert_eq!(hit.repo_id(), "owner/repo");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_preview_mode_truncates_summaries() {
    let dir = TempDir::new().unwrap();
    let verbose = r#""""Verbose utilities for formatting, padding, aligning, wrapping, and
otherwise massaging long stretches of report text before they are written to
the terminal, covering currency amounts, percentages, ISO dates, durations,
scientific notation, and arbitrarily nested tabular layouts."""


def pad(text, width):
    """Pad text to a width.

    Appends spaces until the rendered width is reached.
    """
    return text.ljust(width)
"#;
    std::fs::write(dir.path().join("util.py"), verbose).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let hits = env
        .search
        .execute(
            SearchRequest::new("acme", "arithmetic helpers")
                .with_level(SearchLevel::File)
                .with_limit(1)
                .with_preview_mode(true),
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert!(hits[0].summary_text().chars().count() <= 200);
    assert!(hits[0].truncated_preview());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unrouted_query_defaults_to_file_level() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let hits = env
        .search
        .execute(SearchRequest::new("acme", "arithmetic helpers").with_limit(5))
        .await
        .unwrap();

    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.kind(), DocumentKind::FileIndex);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_results_are_not_an_error() {
    let env = setup_env();
    let hits = env
        .search
        .execute(
            SearchRequest::new("acme", "anything at all")
                .with_level(SearchLevel::Symbol)
                .with_limit(5),
        )
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_index_missing_surfaces_typed_error() {
    let env = setup_env();
    env.store.set_index_missing(true);

    let err = env
        .search
        .execute(SearchRequest::new("acme", "anything").with_level(SearchLevel::File))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::IndexUnavailable(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_transient_failure_is_retried() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    env.store.inject_transient_search_failures(1);
    let hits = env
        .search
        .execute(
            SearchRequest::new("acme", "arithmetic helpers")
                .with_level(SearchLevel::File)
                .with_limit(5),
        )
        .await
        .unwrap();
    assert!(!hits.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_persistent_transient_failure_becomes_search_unavailable() {
    let env = setup_env();
    env.store.inject_transient_search_failures(2);

    let err = env
        .search
        .execute(SearchRequest::new("acme", "anything").with_level(SearchLevel::File))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::SearchUnavailable(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_doc_level_routes_to_module_summaries() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let hits = env
        .search
        .execute(
            SearchRequest::new("acme", "arithmetic helpers")
                .with_level(SearchLevel::Doc)
                .with_limit(5),
        )
        .await
        .unwrap();
    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.kind(), DocumentKind::ModuleSummary);
    }
}
