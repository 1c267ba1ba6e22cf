use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use tokio::sync::mpsc::Sender;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::ChunkerService;
use crate::domain::{
    compute_content_hash, estimate_tokens, truncate_to_tokens, ChunkKind, DomainError,
    EngineConfig, FileChunks, Language, MetadataChunk, RawChunk,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct WalkStats {
    /// Every file considered: emitted plus skipped.
    pub total_files: u64,
    pub emitted_files: u64,
    pub skipped_files: u64,
}

enum FileOutcome {
    Emitted,
    Skipped,
    ChannelClosed,
}

/// Streaming producer over one repository checkout: enumerates files under
/// the fail-closed skip policy, parses up to `parser_parallelism` files
/// concurrently, and yields [`FileChunks`] into a bounded channel. Memory is
/// bounded by the parallelism cap times the file size cap plus the channel.
pub struct FileWalker {
    config: Arc<EngineConfig>,
    chunker: Arc<dyn ChunkerService>,
}

impl FileWalker {
    pub fn new(config: Arc<EngineConfig>, chunker: Arc<dyn ChunkerService>) -> Self {
        Self { config, chunker }
    }

    /// First pass: collect retained relative paths and count policy skips.
    /// The listing is sorted so downstream work is deterministic.
    pub fn enumerate(&self, repo_root: &Path) -> Result<(Vec<String>, u64), DomainError> {
        let mut retained = Vec::new();
        let mut skipped = 0u64;

        let walker = WalkBuilder::new(repo_root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking directory: {}", e);
                    continue;
                }
            };
            let entry_path = entry.path();
            if !entry_path.is_file() {
                continue;
            }

            let relative_path = entry_path
                .strip_prefix(repo_root)
                .unwrap_or(entry_path)
                .to_string_lossy()
                .replace('\\', "/");

            if self.config.is_junk_path(&relative_path) {
                debug!("Skipping junk path: {}", relative_path);
                skipped += 1;
                continue;
            }

            if !Language::from_path(entry_path).is_known() {
                skipped += 1;
                continue;
            }

            let size = entry
                .metadata()
                .map(|m| m.len())
                .unwrap_or(u64::MAX);
            if size > self.config.max_file_bytes {
                debug!("Skipping oversized file ({} bytes): {}", size, relative_path);
                skipped += 1;
                continue;
            }

            retained.push(relative_path);
        }

        retained.sort();
        Ok((retained, skipped))
    }

    /// Walk the checkout and stream chunk groups into `tx`.
    ///
    /// Cancellation is observed at file boundaries: files already being
    /// parsed finish, no new file starts.
    pub async fn run(
        &self,
        repo_root: &Path,
        tx: Sender<FileChunks>,
        cancel: CancellationToken,
    ) -> Result<WalkStats, DomainError> {
        let (retained, skipped) = self.enumerate(repo_root)?;
        self.stream(repo_root, retained, skipped, tx, cancel).await
    }

    /// Stream a pre-enumerated retained list. Split from [`Self::run`] so the
    /// caller can learn the file total before the pipeline starts.
    pub async fn stream(
        &self,
        repo_root: &Path,
        retained: Vec<String>,
        mut skipped: u64,
        tx: Sender<FileChunks>,
        cancel: CancellationToken,
    ) -> Result<WalkStats, DomainError> {
        let total_files = retained.len() as u64 + skipped;
        debug!(
            "Walk found {} candidate files ({} skipped by policy)",
            total_files, skipped
        );

        let semaphore = Arc::new(Semaphore::new(self.config.parser_parallelism));
        let mut handles = Vec::with_capacity(retained.len());

        for relative_path in retained {
            if cancel.is_cancelled() {
                // Let in-flight files drain; report what we know.
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DomainError::internal(format!("Semaphore closed: {}", e)))?;
            let tx = tx.clone();
            let config = Arc::clone(&self.config);
            let chunker = Arc::clone(&self.chunker);
            let root = repo_root.to_path_buf();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match process_file(&config, chunker.as_ref(), &root, &relative_path).await {
                    Ok(Some(group)) => {
                        if tx.send(group).await.is_err() {
                            FileOutcome::ChannelClosed
                        } else {
                            FileOutcome::Emitted
                        }
                    }
                    Ok(None) => FileOutcome::Skipped,
                    Err(e) => {
                        warn!("Failed to chunk {}: {}", relative_path, e);
                        FileOutcome::Skipped
                    }
                }
            }));
        }
        drop(tx);

        let mut emitted = 0u64;
        for outcome in futures_util::future::join_all(handles).await {
            match outcome {
                Ok(FileOutcome::Emitted) => emitted += 1,
                Ok(FileOutcome::Skipped) => skipped += 1,
                Ok(FileOutcome::ChannelClosed) => {}
                Err(e) => {
                    warn!("Chunker task panicked: {}", e);
                    skipped += 1;
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        Ok(WalkStats {
            total_files,
            emitted_files: emitted,
            skipped_files: skipped,
        })
    }
}

/// Read, hash, and chunk one file. Returns `None` when the content-based
/// skip policy applies (too short after whitespace strip).
async fn process_file(
    config: &EngineConfig,
    chunker: &dyn ChunkerService,
    repo_root: &Path,
    relative_path: &str,
) -> Result<Option<FileChunks>, DomainError> {
    let absolute: PathBuf = repo_root.join(relative_path);
    let content = tokio::fs::read_to_string(&absolute).await?;

    let stripped_len: usize = content.split_whitespace().map(str::len).sum();
    if stripped_len < config.min_file_bytes {
        debug!("Skipping near-empty file: {}", relative_path);
        return Ok(None);
    }

    let language = Language::from_path(&absolute);
    let file_commit = compute_content_hash(&content);
    let line_count = content.lines().count() as u32;

    let mut parse_degraded = false;
    let symbols = if chunker.supports_language(language) {
        match chunker.chunk(&content, relative_path, language) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Parse degraded for {}: {}", relative_path, e);
                parse_degraded = true;
                Vec::new()
            }
        }
    } else {
        parse_degraded = true;
        Vec::new()
    };

    let metadata = build_metadata_chunk(config, &content, language, &symbols);

    // Small files keep a whole-file chunk as the file-level representation;
    // large parsed files are represented by their symbol summaries instead.
    // A file without a usable parse is whole-file regardless of size,
    // truncated at the token threshold.
    let estimated = estimate_tokens(content.len());
    let mut truncated = false;
    let whole_file = if estimated < config.file_token_threshold {
        Some(RawChunk::new(
            relative_path,
            language,
            1,
            line_count.max(1),
            ChunkKind::WholeFile,
            content.clone(),
        ))
    } else if parse_degraded || symbols.is_empty() {
        let (clipped, was_cut) = truncate_to_tokens(&content, config.file_token_threshold);
        truncated = was_cut;
        let clipped_lines = clipped.lines().count() as u32;
        Some(RawChunk::new(
            relative_path,
            language,
            1,
            clipped_lines.max(1),
            ChunkKind::WholeFile,
            clipped,
        ))
    } else {
        None
    };

    let mut group = FileChunks::new(
        relative_path,
        language,
        file_commit,
        line_count,
        metadata,
        whole_file,
        symbols,
    );
    if parse_degraded {
        group = group.mark_parse_degraded();
    }
    if truncated {
        group = group.mark_truncated();
    }
    Ok(Some(group))
}

/// Metadata chunk: head of the source (line- and byte-capped), top-level
/// symbol counts, and the module docstring when the language has one.
fn build_metadata_chunk(
    config: &EngineConfig,
    content: &str,
    language: Language,
    symbols: &[RawChunk],
) -> MetadataChunk {
    let mut head = String::new();
    for line in content.lines().take(config.metadata_head_lines) {
        if head.len() + line.len() + 1 > config.metadata_head_bytes {
            break;
        }
        head.push_str(line);
        head.push('\n');
    }

    let function_count = symbols
        .iter()
        .filter(|c| c.kind() == ChunkKind::Function && c.parent_symbol().is_none())
        .count() as u32;
    let class_count = symbols
        .iter()
        .filter(|c| c.kind() == ChunkKind::ClassHeader && c.parent_symbol().is_none())
        .count() as u32;

    MetadataChunk::new(
        head,
        function_count,
        class_count,
        extract_module_docstring(content, language),
    )
}

fn extract_module_docstring(content: &str, language: Language) -> Option<String> {
    match language {
        Language::Python => {
            let trimmed = content.trim_start();
            for delim in ["\"\"\"", "'''"] {
                if let Some(rest) = trimmed.strip_prefix(delim) {
                    if let Some(end) = rest.find(delim) {
                        let doc = rest[..end].trim();
                        if !doc.is_empty() {
                            return Some(doc.to_string());
                        }
                    }
                }
            }
            None
        }
        Language::Rust => {
            let doc: Vec<&str> = content
                .lines()
                .take_while(|l| l.trim_start().starts_with("//!"))
                .map(|l| l.trim_start().trim_start_matches("//!").trim())
                .collect();
            if doc.is_empty() {
                None
            } else {
                Some(doc.join(" ").trim().to_string())
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_python_module_docstring() {
        let source = "\"\"\"Utility helpers.\"\"\"\n\ndef f():\n    pass\n";
        assert_eq!(
            extract_module_docstring(source, Language::Python).as_deref(),
            Some("Utility helpers.")
        );
        assert_eq!(extract_module_docstring("def f():\n    pass", Language::Python), None);
    }

    #[test]
    fn test_extract_rust_module_docstring() {
        let source = "//! Crate docs.\n//! More.\nfn main() {}\n";
        assert_eq!(
            extract_module_docstring(source, Language::Rust).as_deref(),
            Some("Crate docs. More.")
        );
    }

    #[test]
    fn test_metadata_head_respects_caps() {
        let config = EngineConfig {
            metadata_head_lines: 2,
            ..EngineConfig::default()
        };
        let content = "one\ntwo\nthree\nfour\n";
        let meta = build_metadata_chunk(&config, content, Language::Python, &[]);
        assert_eq!(meta.head(), "one\ntwo\n");
    }
}
