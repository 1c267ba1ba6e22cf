//! End-to-end ingestion tests over the in-memory store with deterministic
//! mock LLM and embedding backends.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use codesmriti::{
    Document, DocumentKind, DocumentStore, DomainError, EngineConfig, IngestOutcome,
    IngestRepositoryUseCase, JobKind, Language, MemoryDocumentStore, MockChatClient,
    MockEmbedding, NoopProgress, SymbolKind, TreeSitterChunker, UNIT_NORM_TOLERANCE,
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

const UTIL_PY_WITH_GREETER: &str = r#""""Small arithmetic helpers."""


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


class Greeter:
    def hello(self, name):
        """Greet a person by name.

        Builds and returns the greeting string.
        """
        return "hello " + name
"#;

struct TestEnv {
    store: Arc<MemoryDocumentStore>,
    use_case: IngestRepositoryUseCase,
}

fn setup_env_with(chat: MockChatClient) -> TestEnv {
    // Millisecond backoff keeps the retry-exhaustion tests fast.
    let config = Arc::new(EngineConfig {
        llm_backoff_base_ms: 5,
        llm_backoff_cap_ms: 20,
        ..EngineConfig::default()
    });
    let store = Arc::new(MemoryDocumentStore::new());
    let use_case = IngestRepositoryUseCase::new(
        store.clone(),
        Arc::new(TreeSitterChunker::new()),
        Arc::new(chat),
        Arc::new(MockEmbedding::with_dimensions(config.embed_dims)),
        config,
    );
    TestEnv { store, use_case }
}

fn setup_env() -> TestEnv {
    setup_env_with(MockChatClient::new())
}

async fn ingest(env: &TestEnv, dir: &Path, tenant: &str, repo: &str) -> IngestOutcome {
    env.use_case
        .execute(
            tenant,
            repo,
            dir,
            JobKind::Incremental,
            CancellationToken::new(),
            Arc::new(NoopProgress),
        )
        .await
        .expect("ingestion failed")
}

async fn docs_of_kind(env: &TestEnv, tenant: &str, repo: &str, kind: DocumentKind) -> Vec<Document> {
    env.store
        .list_by_kind(tenant, Some(repo), kind)
        .await
        .expect("list failed")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_file_repo_produces_full_hierarchy() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    let outcome = ingest(&env, dir.path(), "acme", "owner/repo").await;
    assert_eq!(outcome.processed_files, 1);

    let repos = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::RepoSummary).await;
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].languages(), Some(&["python".to_string()][..]));
    let counts = repos[0].doc_counts().unwrap();
    assert_eq!(counts.get("file_index"), Some(&1));
    assert_eq!(counts.get("symbol_index"), Some(&2));

    let modules = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::ModuleSummary).await;
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].path(), Some(""));

    let files = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path(), Some("util.py"));
    assert_eq!(files[0].language(), Some(Language::Python));

    let mut symbols = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::SymbolIndex).await;
    symbols.sort_by(|a, b| a.symbol_name().cmp(&b.symbol_name()));
    assert_eq!(symbols.len(), 2);
    assert_eq!(symbols[0].symbol_name(), Some("add"));
    assert_eq!(symbols[1].symbol_name(), Some("sub"));
    assert!(symbols
        .iter()
        .all(|s| s.symbol_kind() == Some(SymbolKind::Function)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_stored_embedding_is_unit_length() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let all = env.store.all_documents().await;
    assert!(!all.is_empty());
    for doc in all {
        let embedding = doc.embedding().expect("document without embedding");
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < UNIT_NORM_TOLERANCE,
            "document {} has norm {}",
            doc.id(),
            norm
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hierarchy_closure() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();
    std::fs::write(dir.path().join("pkg/more.py"), UTIL_PY_WITH_GREETER).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let all = env.store.all_documents().await;
    for doc in &all {
        if doc.kind() == DocumentKind::RepoSummary {
            assert!(doc.parent_id().is_none());
            continue;
        }
        let parent_id = doc.parent_id().expect("non-repo document without parent");
        let parent = env
            .store
            .fetch_document(parent_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("dangling parent {} for {}", parent_id, doc.id()));
        assert!(
            doc.kind().valid_parent_kinds().contains(&parent.kind()),
            "{} has parent of kind {:?}",
            doc.id(),
            parent.kind()
        );
        assert_eq!(parent.repo_id(), doc.repo_id());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_run_on_unchanged_tree_upserts_nothing() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();
    std::fs::write(dir.path().join("pkg/more.py"), UTIL_PY_WITH_GREETER).unwrap();

    let env = setup_env();
    let first = ingest(&env, dir.path(), "acme", "owner/repo").await;
    assert!(first.upserted_documents > 0);

    let second = ingest(&env, dir.path(), "acme", "owner/repo").await;
    assert_eq!(second.upserted_documents, 0);
    assert_eq!(second.deleted_documents, 0);
    assert_eq!(second.unchanged_files, 2);
    assert_eq!(second.processed_files, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_adding_a_method_reingests_only_that_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();
    std::fs::write(
        dir.path().join("other.py"),
        "\"\"\"Side file used to verify reconciliation granularity.\"\"\"\n\n\ndef probe(value):\n    \"\"\"Probe a value for presence.\n\n    Reports whether the given value is set to something meaningful.\n    \"\"\"\n    return value is not None\n",
    )
    .unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let other_before: Vec<Document> =
        docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex)
            .await
            .into_iter()
            .filter(|d| d.path() == Some("other.py"))
            .collect();

    std::fs::write(dir.path().join("util.py"), UTIL_PY_WITH_GREETER).unwrap();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let mut symbols = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::SymbolIndex).await;
    symbols.retain(|s| s.path() == Some("util.py"));
    let mut names: Vec<String> = symbols
        .iter()
        .filter_map(|s| s.canonical_name())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Greeter.hello", "add", "sub"]);

    let hello = symbols
        .iter()
        .find(|s| s.canonical_name().as_deref() == Some("Greeter.hello"))
        .unwrap();
    assert_eq!(hello.symbol_kind(), Some(SymbolKind::Method));

    // The untouched file keeps its documents byte-for-byte.
    let other_after: Vec<Document> =
        docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex)
            .await
            .into_iter()
            .filter(|d| d.path() == Some("other.py"))
            .collect();
    assert_eq!(other_before.len(), 1);
    assert_eq!(other_after.len(), 1);
    assert_eq!(other_before[0].content_hash(), other_after[0].content_hash());
    assert_eq!(other_before[0].summary_text(), other_after[0].summary_text());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rename_cascades_old_path_and_inserts_new() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    std::fs::rename(dir.path().join("util.py"), dir.path().join("utils.py")).unwrap();
    let outcome = ingest(&env, dir.path(), "acme", "owner/repo").await;
    assert!(outcome.deleted_documents >= 3);

    let files = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path(), Some("utils.py"));

    let symbols = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::SymbolIndex).await;
    assert_eq!(symbols.len(), 2);
    for symbol in &symbols {
        assert_eq!(symbol.path(), Some("utils.py"));
        assert!(symbol.id().contains("utils.py#"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_generated_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();
    let huge = "x = 1  # filler\n".repeat(2 * 1024 * 1024 / 16);
    std::fs::write(dir.path().join("huge.py"), huge).unwrap();

    let env = setup_env();
    let outcome = ingest(&env, dir.path(), "acme", "owner/repo").await;
    assert_eq!(outcome.skipped_files, 1);
    assert_eq!(outcome.processed_files, 1);
    assert_eq!(outcome.total_files, 2);

    let files = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path(), Some("util.py"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_junk_and_unknown_extensions_are_skipped() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();
    std::fs::write(
        dir.path().join("node_modules/dep/index.js"),
        "function a() { return 1; }\n".repeat(10),
    )
    .unwrap();
    std::fs::write(dir.path().join("README.md"), "# docs\nlots of text here\n").unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let files = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path(), Some("util.py"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pre_cancelled_job_reports_cancelled_and_next_run_converges() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = env
        .use_case
        .execute(
            "acme",
            "owner/repo",
            dir.path(),
            JobKind::Incremental,
            cancel,
            Arc::new(NoopProgress),
        )
        .await;
    assert!(matches!(result, Err(DomainError::Cancelled)));

    // The next run reconciles whatever the cancelled run left behind.
    let outcome = ingest(&env, dir.path(), "acme", "owner/repo").await;
    assert_eq!(outcome.processed_files, 1);
    let files = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex).await;
    assert_eq!(files.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_llm_failures_degrade_summaries_without_stalling() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    // More failures than retries: every LLM call in the run is exhausted.
    let env = setup_env_with(MockChatClient::failing_first(1_000));
    let outcome = ingest(&env, dir.path(), "acme", "owner/repo").await;
    assert!(outcome.upserted_documents > 0);

    let files = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex).await;
    assert!(files[0].summary_degraded());
    assert!(!files[0].summary_text().is_empty());

    let symbols = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::SymbolIndex).await;
    assert!(symbols.iter().all(|s| s.summary_degraded()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_markdown_only_llm_output_marks_degraded() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env_with(MockChatClient::markdown_only());
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let files = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::FileIndex).await;
    assert!(files[0].summary_degraded());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_job_purges_before_rebuilding() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;
    let before = env.store.document_count().await;

    let outcome = env
        .use_case
        .execute(
            "acme",
            "owner/repo",
            dir.path(),
            JobKind::Full,
            CancellationToken::new(),
            Arc::new(NoopProgress),
        )
        .await
        .unwrap();

    assert_eq!(env.store.document_count().await, before);
    assert!(outcome.upserted_documents > 0);
    assert_eq!(outcome.unchanged_files, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nested_folders_roll_up_into_module_chain() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
    std::fs::write(dir.path().join("a/b/deep.py"), UTIL_PY).unwrap();

    let env = setup_env();
    ingest(&env, dir.path(), "acme", "owner/repo").await;

    let mut modules = docs_of_kind(&env, "acme", "owner/repo", DocumentKind::ModuleSummary).await;
    modules.sort_by(|a, b| a.path().cmp(&b.path()));
    let paths: Vec<&str> = modules.iter().filter_map(Document::path).collect();
    assert_eq!(paths, vec!["", "a", "a/b"]);

    // Parent chain: a/b → a → "" → repo.
    let deep = modules.iter().find(|m| m.path() == Some("a/b")).unwrap();
    assert_eq!(deep.parent_id(), Some("acme:owner/repo:module_summary:a"));
    let root = modules.iter().find(|m| m.path() == Some("")).unwrap();
    assert_eq!(root.parent_id(), Some("acme:owner/repo:repo_summary:root"));
}
