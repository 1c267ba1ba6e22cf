use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::pipeline::{
    EmbeddingBatcher, FileWalker, Reconciler, Summarizer, WalkStats,
};
use crate::application::{ChatClient, ChunkerService, DocumentStore, EmbeddingService};
use crate::domain::{
    compute_aggregate_hash, compute_content_hash, parent_folder, ChunkKind, Document,
    DocumentKind, DomainError, EngineConfig, FileChunks, JobKind, JobProgress, SymbolKind,
};

/// Observes per-file progress. The orchestrator plugs the job registry in
/// here; the CLI plugs a progress bar.
pub trait ProgressSink: Send + Sync {
    fn update(&self, progress: &JobProgress);
}

/// Sink that drops every update.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn update(&self, _progress: &JobProgress) {}
}

#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub total_files: u64,
    pub processed_files: u64,
    pub unchanged_files: u64,
    pub skipped_files: u64,
    pub total_chunks: u64,
    pub upserted_documents: u64,
    pub deleted_documents: u64,
}

/// Drives one ingestion job: a parallel walker/chunker producer feeding a
/// single summarizer, a single embedding stage, and a storage writer, all
/// connected by bounded channels. Bounded sends are the only backpressure
/// mechanism; a slow LLM or store stalls the walk instead of growing queues.
pub struct IngestRepositoryUseCase {
    store: Arc<dyn DocumentStore>,
    chunker: Arc<dyn ChunkerService>,
    summarizer: Arc<Summarizer>,
    batcher: Arc<EmbeddingBatcher>,
    config: Arc<EngineConfig>,
}

impl IngestRepositoryUseCase {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        chunker: Arc<dyn ChunkerService>,
        chat: Arc<dyn ChatClient>,
        embedding: Arc<dyn EmbeddingService>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            chunker,
            summarizer: Arc::new(Summarizer::new(chat, Arc::clone(&config))),
            batcher: Arc::new(EmbeddingBatcher::new(embedding, Arc::clone(&config))),
            config,
        }
    }

    pub async fn execute(
        &self,
        tenant_id: &str,
        repo_id: &str,
        repo_path: &Path,
        kind: JobKind,
        cancel: CancellationToken,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<IngestOutcome, DomainError> {
        if !repo_path.is_dir() {
            return Err(DomainError::invalid_input(format!(
                "Checkout path {} is not a directory",
                repo_path.display()
            )));
        }

        let started = Instant::now();
        info!(
            "Ingesting {}/{} ({}) from {}",
            tenant_id,
            repo_id,
            kind.as_str(),
            repo_path.display()
        );

        if kind == JobKind::Full {
            let purged = self.store.delete_by_repo(tenant_id, repo_id).await?;
            if purged > 0 {
                info!("Full ingestion purged {} existing documents", purged);
            }
        }

        let reconciler =
            Reconciler::load(Arc::clone(&self.store), tenant_id, repo_id).await?;

        let walker = FileWalker::new(Arc::clone(&self.config), Arc::clone(&self.chunker));
        let (retained, policy_skipped) = walker.enumerate(repo_path)?;
        let total_files = retained.len() as u64 + policy_skipped;
        progress.update(&JobProgress {
            total_files,
            skipped_files: policy_skipped,
            ..JobProgress::default()
        });

        let (tx_chunks, rx_chunks) = mpsc::channel(self.config.chunk_channel_capacity);
        let (tx_docs, rx_docs) = mpsc::channel(self.config.doc_channel_capacity);
        let (tx_store, rx_store) = mpsc::channel(self.config.storage_channel_capacity);

        let walk_handle = {
            let walker_root = repo_path.to_path_buf();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                walker
                    .stream(&walker_root, retained, policy_skipped, tx_chunks, cancel)
                    .await
            })
        };

        let summarize_handle = {
            let summarizer = Arc::clone(&self.summarizer);
            let config = Arc::clone(&self.config);
            let cancel = cancel.clone();
            let progress = Arc::clone(&progress);
            let tenant = tenant_id.to_string();
            let repo = repo_id.to_string();
            tokio::spawn(summarize_stage(
                summarizer, config, reconciler, rx_chunks, tx_docs, cancel, progress, tenant,
                repo, total_files, policy_skipped,
            ))
        };

        let embed_handle = {
            let batcher = Arc::clone(&self.batcher);
            let batch_size = self.config.embed_batch_size;
            let cancel = cancel.clone();
            tokio::spawn(embed_stage(batcher, batch_size, rx_docs, tx_store, cancel))
        };

        let write_handle = {
            let store = Arc::clone(&self.store);
            let config = Arc::clone(&self.config);
            let cancel = cancel.clone();
            tokio::spawn(write_stage(store, config, rx_store, cancel))
        };

        let walk_stats = join_stage(walk_handle).await;
        let summarize_result = join_stage(summarize_handle).await;
        let embed_result = join_stage(embed_handle).await;
        let upserted = join_stage(write_handle).await;

        // Cancellation is reported only after every stage has drained, so
        // partial work is fully flushed; it also takes precedence over the
        // channel-teardown errors a mid-stream cancel produces.
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        let walk_stats: WalkStats = walk_stats?;
        let stage = summarize_result?;
        embed_result?;
        let mut upserted: u64 = upserted?;

        // Deletions for vanished paths happen only on a complete walk.
        let mut deleted = stage.reconciler.finish().await?;

        let rollup = self
            .rollup(tenant_id, repo_id, &cancel)
            .await?;
        upserted += rollup.upserted;
        deleted += rollup.deleted;

        let outcome = IngestOutcome {
            total_files: walk_stats.total_files,
            processed_files: stage.processed,
            unchanged_files: stage.reconciler.unchanged_count(),
            skipped_files: walk_stats.skipped_files,
            total_chunks: stage.chunks,
            upserted_documents: upserted,
            deleted_documents: deleted,
        };
        progress.update(&JobProgress {
            total_files: outcome.total_files,
            processed_files: outcome.processed_files,
            skipped_files: outcome.skipped_files,
            total_chunks: outcome.total_chunks,
            current_file: None,
        });

        info!(
            "Ingestion complete for {}/{}: {} processed, {} unchanged, {} skipped, {} upserts, {} deletes in {:.2}s",
            tenant_id,
            repo_id,
            outcome.processed_files,
            outcome.unchanged_files,
            outcome.skipped_files,
            outcome.upserted_documents,
            outcome.deleted_documents,
            started.elapsed().as_secs_f64()
        );
        Ok(outcome)
    }

    /// Phase B: cross-level aggregation. Reads the post-stream store state,
    /// rebuilds module summaries bottom-up for folders whose membership or
    /// member summaries changed, prunes modules whose folders vanished, and
    /// finishes with the repo summary. The repo_summary upsert is last so a
    /// reader observing it observes every descendant.
    async fn rollup(
        &self,
        tenant_id: &str,
        repo_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RollupOutcome, DomainError> {
        let files = self
            .store
            .list_by_kind(tenant_id, Some(repo_id), DocumentKind::FileIndex)
            .await?;
        if files.is_empty() {
            debug!("No file documents for {}/{}; skipping rollup", tenant_id, repo_id);
            return Ok(RollupOutcome::default());
        }

        let existing_modules: HashMap<String, Document> = self
            .store
            .list_by_kind(tenant_id, Some(repo_id), DocumentKind::ModuleSummary)
            .await?
            .into_iter()
            .filter_map(|d| d.path().map(|p| (p.to_string(), d.clone())))
            .collect();

        // Every ancestor folder of every file is a module.
        let mut folders: BTreeSet<String> = BTreeSet::new();
        let mut files_by_folder: BTreeMap<String, Vec<&Document>> = BTreeMap::new();
        for file in &files {
            let path = file.path().unwrap_or_default().to_string();
            let mut folder = parent_folder(&path).unwrap_or_default();
            files_by_folder.entry(folder.clone()).or_default().push(file);
            loop {
                folders.insert(folder.clone());
                match parent_folder(&folder) {
                    Some(parent) => folder = parent,
                    None => break,
                }
            }
        }

        let mut subfolders: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for folder in &folders {
            if let Some(parent) = parent_folder(folder) {
                subfolders.entry(parent).or_default().insert(folder.clone());
            }
        }

        // Deepest folders first so child module summaries exist before their
        // parents aggregate them.
        let mut ordered: Vec<String> = folders.iter().cloned().collect();
        ordered.sort_by_key(|f| std::cmp::Reverse(f.matches('/').count() + usize::from(!f.is_empty())));

        let mut module_summaries: HashMap<String, (String, String)> = HashMap::new();
        let mut pending: Vec<Document> = Vec::new();
        let mut outcome = RollupOutcome::default();

        for folder in &ordered {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }

            // Children ordered lexicographically by path: files then
            // subfolder modules, merged by name.
            let mut entries: Vec<(String, String, String)> = Vec::new();
            for file in files_by_folder.get(folder).map(|v| v.as_slice()).unwrap_or(&[]) {
                let path = file.path().unwrap_or_default();
                let name = path.rsplit('/').next().unwrap_or(path).to_string();
                entries.push((name, file.summary_text().to_string(), file.id().to_string()));
            }
            if let Some(children) = subfolders.get(folder) {
                for child in children {
                    let (id, summary) = module_summaries
                        .get(child)
                        .cloned()
                        .unwrap_or_default();
                    let name = child.rsplit('/').next().unwrap_or(child).to_string();
                    entries.push((name, summary, id));
                }
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let hash_input: Vec<(String, String)> = entries
                .iter()
                .map(|(_, summary, id)| (id.clone(), summary.clone()))
                .collect();
            let content_hash = compute_aggregate_hash(&hash_input);

            if let Some(existing) = existing_modules.get(folder) {
                if existing.content_hash() == content_hash && !existing.summary_degraded() {
                    module_summaries.insert(
                        folder.clone(),
                        (existing.id().to_string(), existing.summary_text().to_string()),
                    );
                    continue;
                }
            }

            let prompt_entries: Vec<(String, String)> = entries
                .iter()
                .map(|(name, summary, _)| (name.clone(), summary.clone()))
                .collect();
            let (summary, truncated) = self
                .summarizer
                .summarize_module(folder, &prompt_entries)
                .await;

            let mut doc = Document::module_summary(tenant_id, repo_id, folder.clone())
                .with_summary(summary.text())
                .with_content_hash(content_hash)
                .with_children(entries.iter().map(|(_, _, id)| id.clone()).collect());
            if truncated {
                doc = doc.mark_truncated();
            }
            if summary.degraded() {
                doc = doc.mark_degraded();
            }
            module_summaries.insert(
                folder.clone(),
                (doc.id().to_string(), summary.text().to_string()),
            );
            pending.push(doc);
        }

        // Folders that no longer exist take their module docs with them.
        let stale: Vec<String> = existing_modules
            .iter()
            .filter(|(path, _)| !folders.contains(*path))
            .map(|(_, doc)| doc.id().to_string())
            .collect();
        if !stale.is_empty() {
            outcome.deleted += self.store.delete_documents(&stale).await?;
        }

        // Modules flush before the repo summary is considered.
        outcome.upserted += self.embed_and_write(&mut pending).await?;

        outcome.upserted += self
            .write_repo_summary(tenant_id, repo_id, &files, &module_summaries)
            .await?;
        Ok(outcome)
    }

    async fn write_repo_summary(
        &self,
        tenant_id: &str,
        repo_id: &str,
        files: &[Document],
        module_summaries: &HashMap<String, (String, String)>,
    ) -> Result<u64, DomainError> {
        // Language distribution from file docs, most common first.
        let mut language_counts: BTreeMap<String, u64> = BTreeMap::new();
        for file in files {
            if let Some(language) = file.language() {
                *language_counts.entry(language.as_str().to_string()).or_default() += 1;
            }
        }
        let mut languages: Vec<(String, u64)> = language_counts.into_iter().collect();
        languages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let languages: Vec<String> = languages.into_iter().map(|(l, _)| l).collect();

        let symbol_count = self
            .store
            .list_by_kind(tenant_id, Some(repo_id), DocumentKind::SymbolIndex)
            .await?
            .len() as u64;

        let mut doc_counts: BTreeMap<String, u64> = BTreeMap::new();
        doc_counts.insert("repo_summary".to_string(), 1);
        doc_counts.insert("module_summary".to_string(), module_summaries.len() as u64);
        doc_counts.insert("file_index".to_string(), files.len() as u64);
        doc_counts.insert("symbol_index".to_string(), symbol_count);

        // Top-level modules: folders whose parent is the repo itself.
        let mut top_level: Vec<(&String, &(String, String))> = module_summaries
            .iter()
            .filter(|(folder, _)| parent_folder(folder).is_none())
            .collect();
        top_level.sort_by(|a, b| a.0.cmp(b.0));

        let hash_input: Vec<(String, String)> = top_level
            .iter()
            .map(|(_, (id, summary))| (id.clone(), summary.clone()))
            .collect();
        let content_hash = compute_aggregate_hash(&hash_input);

        if let Some(existing) = self
            .store
            .fetch_document(&crate::domain::repo_doc_id(tenant_id, repo_id))
            .await?
        {
            if existing.content_hash() == content_hash
                && existing.doc_counts() == Some(&doc_counts)
                && !existing.summary_degraded()
            {
                debug!("Repo summary unchanged for {}/{}", tenant_id, repo_id);
                return Ok(0);
            }
        }

        let prompt_entries: Vec<(String, String)> = top_level
            .iter()
            .map(|(folder, (_, summary))| ((*folder).clone(), summary.clone()))
            .collect();
        let (summary, truncated) = self
            .summarizer
            .summarize_repo(repo_id, &prompt_entries, &languages)
            .await;

        let mut doc = Document::repo_summary(tenant_id, repo_id)
            .with_summary(summary.text())
            .with_content_hash(content_hash)
            .with_children(top_level.iter().map(|(_, (id, _))| id.clone()).collect())
            .with_repo_stats(languages, doc_counts);
        if truncated {
            doc = doc.mark_truncated();
        }
        if summary.degraded() {
            doc = doc.mark_degraded();
        }

        let mut batch = vec![doc];
        self.embed_and_write(&mut batch).await
    }

    /// Embed and upsert a rollup batch with the same validation and partial-
    /// failure retry the streaming writer applies.
    async fn embed_and_write(&self, documents: &mut Vec<Document>) -> Result<u64, DomainError> {
        if documents.is_empty() {
            return Ok(0);
        }
        self.batcher.embed_documents(documents).await?;
        let mut written = 0u64;
        for batch in documents.chunks(self.config.storage_batch_size) {
            written += upsert_with_retry(self.store.as_ref(), batch, self.config.embed_dims).await?;
        }
        Ok(written)
    }
}

#[derive(Debug, Default)]
struct RollupOutcome {
    upserted: u64,
    deleted: u64,
}

struct SummarizeStageOutcome {
    reconciler: Reconciler,
    processed: u64,
    chunks: u64,
}

/// Single-consumer summarizer stage. One consumer keeps LLM traffic
/// serialized and guarantees symbols enter the store channel before their
/// file document.
#[allow(clippy::too_many_arguments)]
async fn summarize_stage(
    summarizer: Arc<Summarizer>,
    config: Arc<EngineConfig>,
    mut reconciler: Reconciler,
    mut rx: mpsc::Receiver<FileChunks>,
    tx: mpsc::Sender<Document>,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressSink>,
    tenant_id: String,
    repo_id: String,
    total_files: u64,
    policy_skipped: u64,
) -> Result<SummarizeStageOutcome, DomainError> {
    let mut processed = 0u64;
    let mut chunks = 0u64;

    while let Some(group) = rx.recv().await {
        // File boundary: the cooperative cancellation checkpoint.
        if cancel.is_cancelled() {
            break;
        }

        progress.update(&JobProgress {
            total_files,
            processed_files: processed,
            skipped_files: policy_skipped,
            total_chunks: chunks,
            current_file: Some(group.path().to_string()),
        });

        if reconciler.admit(&group).await?.is_none() {
            processed += 1;
            continue;
        }

        chunks += group.chunk_count() as u64;

        let mut symbol_ids = Vec::new();
        let mut symbol_summaries = Vec::new();
        for chunk in group.symbols() {
            // Small symbols contribute no document; their code still shows
            // up in the file-level summary.
            if chunk.line_count() < config.min_symbol_lines {
                continue;
            }
            let Some(symbol_kind) = symbol_kind_for(chunk.kind()) else {
                continue;
            };
            let summary = summarizer.summarize_symbol(chunk).await;
            let mut doc = Document::symbol_index(
                &tenant_id,
                &repo_id,
                group.path(),
                chunk.symbol_name().unwrap_or("<anonymous>"),
                symbol_kind,
                chunk.start_line(),
                chunk.end_line(),
                chunk.parent_symbol().map(String::from),
            )
            .with_summary(summary.text())
            .with_content_hash(compute_content_hash(chunk.content()));
            if summary.degraded() {
                doc = doc.mark_degraded();
            }
            symbol_ids.push(doc.id().to_string());
            symbol_summaries.push((
                doc.canonical_name().unwrap_or_default(),
                summary.text().to_string(),
            ));
            if tx.send(doc).await.is_err() {
                return Err(DomainError::internal("Document channel closed early"));
            }
        }

        let (file_summary, truncated) =
            summarizer.summarize_file(&group, &symbol_summaries).await;
        let mut file_doc = Document::file_index(
            &tenant_id,
            &repo_id,
            group.path(),
            group.language(),
            group.line_count(),
            group.file_commit(),
        )
        .with_summary(file_summary.text())
        .with_content_hash(group.file_commit())
        .with_children(symbol_ids);
        if truncated {
            file_doc = file_doc.mark_truncated();
        }
        if file_summary.degraded() {
            file_doc = file_doc.mark_degraded();
        }
        if group.parse_degraded() {
            file_doc = file_doc.mark_parse_degraded();
        }
        if tx.send(file_doc).await.is_err() {
            return Err(DomainError::internal("Document channel closed early"));
        }

        processed += 1;
    }

    Ok(SummarizeStageOutcome {
        reconciler,
        processed,
        chunks,
    })
}

/// Single embedding stage keeps batches coherent; batch boundaries are
/// cancellation checkpoints.
async fn embed_stage(
    batcher: Arc<EmbeddingBatcher>,
    batch_size: usize,
    mut rx: mpsc::Receiver<Document>,
    tx: mpsc::Sender<Document>,
    cancel: CancellationToken,
) -> Result<(), DomainError> {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(doc) => batch.push(doc),
                Err(_) => break,
            }
        }

        batcher.embed_documents(&mut batch).await?;
        for doc in batch {
            if tx.send(doc).await.is_err() {
                return Err(DomainError::internal("Storage channel closed early"));
            }
        }

        if cancel.is_cancelled() {
            // Drain stops; upstream senders unblock by erroring out.
            break;
        }
    }
    Ok(())
}

/// Storage writer: streams batches with per-document accounting and retries
/// only the failed ids.
async fn write_stage(
    store: Arc<dyn DocumentStore>,
    config: Arc<EngineConfig>,
    mut rx: mpsc::Receiver<Document>,
    cancel: CancellationToken,
) -> Result<u64, DomainError> {
    let mut written = 0u64;
    let mut batch: Vec<Document> = Vec::with_capacity(config.storage_batch_size);

    loop {
        let doc = rx.recv().await;
        match doc {
            Some(doc) => {
                batch.push(doc);
                if batch.len() >= config.storage_batch_size {
                    written += upsert_with_retry(store.as_ref(), &batch, config.embed_dims).await?;
                    batch.clear();
                    if cancel.is_cancelled() {
                        // Flush what we took; the current file's documents
                        // are already in flight upstream.
                        continue;
                    }
                }
            }
            None => {
                if !batch.is_empty() {
                    written += upsert_with_retry(store.as_ref(), &batch, config.embed_dims).await?;
                }
                return Ok(written);
            }
        }
    }
}

const UPSERT_ATTEMPTS: u32 = 3;

/// Validate, upsert, and retry partial failures. Invariant violations are
/// fatal; exhausted transient failures are logged and dropped so one bad
/// item cannot fail the whole job.
async fn upsert_with_retry(
    store: &dyn DocumentStore,
    batch: &[Document],
    embed_dims: usize,
) -> Result<u64, DomainError> {
    for doc in batch {
        doc.validate(embed_dims)?;
    }

    let mut remaining: Vec<&Document> = batch.iter().collect();
    let mut written = 0u64;

    for attempt in 0..UPSERT_ATTEMPTS {
        let docs: Vec<Document> = remaining.iter().map(|d| (*d).clone()).collect();
        let outcome = match store.upsert_documents(&docs).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() && attempt + 1 < UPSERT_ATTEMPTS => {
                let delay = crate::application::pipeline::backoff_delay(attempt, 500, 5_000);
                warn!("Upsert batch failed ({}); retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        written += outcome.succeeded().len() as u64;
        if outcome.is_complete() {
            return Ok(written);
        }

        let failed: std::collections::HashSet<&str> =
            outcome.failed().iter().map(String::as_str).collect();
        remaining.retain(|d| failed.contains(d.id()));
        if attempt + 1 < UPSERT_ATTEMPTS {
            let delay = crate::application::pipeline::backoff_delay(attempt, 500, 5_000);
            warn!(
                "{} documents failed to upsert; retrying in {:?}",
                remaining.len(),
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    warn!(
        "Dropping {} documents after {} upsert attempts",
        remaining.len(),
        UPSERT_ATTEMPTS
    );
    Ok(written)
}

fn symbol_kind_for(kind: ChunkKind) -> Option<SymbolKind> {
    match kind {
        ChunkKind::Function => Some(SymbolKind::Function),
        ChunkKind::ClassHeader => Some(SymbolKind::Class),
        ChunkKind::Method => Some(SymbolKind::Method),
        ChunkKind::WholeFile => None,
    }
}

async fn join_stage<T>(
    handle: tokio::task::JoinHandle<Result<T, DomainError>>,
) -> Result<T, DomainError> {
    handle
        .await
        .map_err(|e| DomainError::internal(format!("Pipeline stage panicked: {}", e)))?
}
