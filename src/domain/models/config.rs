use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Typed engine configuration. Every tunable the pipeline and search engine
/// recognize is enumerated here; there is no dynamic option passing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cross-tenant ingestion worker pool size.
    pub workers_per_pool: usize,
    /// Files parsed in parallel inside one job.
    pub parser_parallelism: usize,
    /// Bounded channel between walker/chunker and the summarizer.
    pub chunk_channel_capacity: usize,
    /// Bounded channel between summarizer and embedder.
    pub doc_channel_capacity: usize,
    /// Bounded channel between embedder and the storage writer.
    pub storage_channel_capacity: usize,
    /// Documents per embedding batch.
    pub embed_batch_size: usize,
    /// Fixed embedding dimensionality. Any other length is a fatal error.
    pub embed_dims: usize,
    /// Maximum bytes of text per embedding input; longer inputs are cut at a
    /// whitespace boundary.
    pub max_embed_input_bytes: usize,
    /// Symbols spanning fewer lines produce no symbol document.
    pub min_symbol_lines: u32,
    /// Junk path patterns, matched against the relative path.
    pub junk_patterns: Vec<String>,
    /// Hard per-file size cap.
    pub max_file_bytes: u64,
    /// Files shorter than this after whitespace strip are skipped.
    pub min_file_bytes: usize,
    /// Whole-file chunking applies below this estimated token count.
    pub file_token_threshold: usize,
    /// Metadata chunk: head line and byte caps.
    pub metadata_head_lines: usize,
    pub metadata_head_bytes: usize,
    /// Input budget for file/module/repo aggregation prompts.
    pub summary_input_budget_tokens: usize,
    /// LLM retry policy.
    pub llm_max_retries: u32,
    pub llm_backoff_base_ms: u64,
    pub llm_backoff_cap_ms: u64,
    /// kNN oversampling factor: `k = limit × oversample`.
    pub oversample: usize,
    /// Preview truncation length for `preview_mode` hits.
    pub preview_chars: usize,
    /// Documents per storage write batch.
    pub storage_batch_size: usize,
    /// Per-request byte cap for on-demand source fetch.
    pub max_fetch_bytes: usize,
    /// Root directory holding per-tenant repository checkouts.
    pub checkout_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers_per_pool: 4,
            parser_parallelism: 10,
            chunk_channel_capacity: 256,
            doc_channel_capacity: 256,
            storage_channel_capacity: 256,
            embed_batch_size: 128,
            embed_dims: 768,
            max_embed_input_bytes: 6 * 1024,
            min_symbol_lines: 5,
            junk_patterns: default_junk_patterns(),
            max_file_bytes: 1024 * 1024,
            min_file_bytes: 100,
            file_token_threshold: 6_000,
            metadata_head_lines: 200,
            metadata_head_bytes: 4 * 1024,
            summary_input_budget_tokens: 3_000,
            llm_max_retries: 3,
            llm_backoff_base_ms: 1_000,
            llm_backoff_cap_ms: 30_000,
            oversample: 2,
            preview_chars: 200,
            storage_batch_size: 100,
            max_fetch_bytes: 64 * 1024,
            checkout_root: PathBuf::from("checkouts"),
        }
    }
}

/// Built-in junk patterns: build outputs, dependency stores, minified
/// assets, lockfiles, generated code, source maps.
fn default_junk_patterns() -> Vec<String> {
    [
        "node_modules/",
        "vendor/",
        "target/",
        "dist/",
        "build/",
        "out/",
        ".git/",
        "__pycache__/",
        ".venv/",
        "venv/",
        "site-packages/",
        ".min.js",
        ".min.css",
        ".map",
        ".lock",
        "package-lock.json",
        "yarn.lock",
        "Cargo.lock",
        "go.sum",
        "_pb2.py",
        ".pb.go",
        "_generated.",
        ".generated.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl EngineConfig {
    /// A path is junk when any pattern matches: directory patterns
    /// (trailing `/`) match any path component, the rest match as
    /// suffix or substring of the file name.
    pub fn is_junk_path(&self, relative_path: &str) -> bool {
        let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.junk_patterns.iter().any(|pattern| {
            if let Some(dir) = pattern.strip_suffix('/') {
                relative_path
                    .split('/')
                    .any(|component| component == dir)
            } else if pattern.starts_with('.') && !pattern.ends_with('.') {
                file_name.ends_with(pattern.as_str())
            } else {
                file_name.contains(pattern.as_str())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.parser_parallelism, 10);
        assert_eq!(config.embed_batch_size, 128);
        assert_eq!(config.embed_dims, 768);
        assert_eq!(config.min_symbol_lines, 5);
        assert_eq!(config.file_token_threshold, 6_000);
        assert_eq!(config.oversample, 2);
        assert_eq!(config.storage_batch_size, 100);
    }

    #[test]
    fn test_junk_path_matching() {
        let config = EngineConfig::default();
        assert!(config.is_junk_path("node_modules/lodash/index.js"));
        assert!(config.is_junk_path("pkg/__pycache__/util.cpython-311.pyc"));
        assert!(config.is_junk_path("assets/app.min.js"));
        assert!(config.is_junk_path("Cargo.lock"));
        assert!(config.is_junk_path("proto/api_pb2.py"));
        assert!(!config.is_junk_path("src/build_tools.py"));
        assert!(!config.is_junk_path("src/main.rs"));
    }
}
