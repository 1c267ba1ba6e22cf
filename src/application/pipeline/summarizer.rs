use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::application::ChatClient;
use crate::domain::{estimate_tokens, DomainError, EngineConfig, FileChunks, RawChunk};

const SYMBOL_SYSTEM: &str = "You summarize one source-code symbol. Reply with at most 3 plain \
     sentences describing what it does and how it is used. No markdown, no code.";
const FILE_SYSTEM: &str = "You summarize one source file from its parts. Reply with at most 8 \
     plain sentences covering the file's purpose and main components. No markdown, no code.";
const MODULE_SYSTEM: &str = "You summarize one source folder from its members. Reply with at \
     most 8 plain sentences covering the folder's role and contents. No markdown, no code.";
const REPO_SYSTEM: &str = "You summarize a whole repository from its top-level modules. Reply \
     with at most 12 plain sentences covering purpose, architecture, and main components. \
     No markdown, no code.";

const SYMBOL_MAX_TOKENS: u32 = 192;
const FILE_MAX_TOKENS: u32 = 384;
const MODULE_MAX_TOKENS: u32 = 384;
const REPO_MAX_TOKENS: u32 = 512;

/// A produced summary. Failures never propagate out of the summarizer; they
/// degrade to a mechanical placeholder so the pipeline cannot stall here.
#[derive(Debug, Clone)]
pub struct Summary {
    text: String,
    degraded: bool,
}

impl Summary {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn degraded(&self) -> bool {
        self.degraded
    }
}

/// Bottom-up LLM aggregation: symbol → file → module → repo.
pub struct Summarizer {
    chat: Arc<dyn ChatClient>,
    config: Arc<EngineConfig>,
}

impl Summarizer {
    pub fn new(chat: Arc<dyn ChatClient>, config: Arc<EngineConfig>) -> Self {
        Self { chat, config }
    }

    pub async fn summarize_symbol(&self, chunk: &RawChunk) -> Summary {
        let mut prompt = format!(
            "Symbol `{}` in {} (lines {}-{}).\nSignature: {}\n",
            chunk.symbol_name().unwrap_or("<anonymous>"),
            chunk.path(),
            chunk.start_line(),
            chunk.end_line(),
            chunk.signature(),
        );
        if let Some(parent) = chunk.parent_symbol() {
            prompt.push_str(&format!("Defined on: {}\n", parent));
        }
        if let Some(docstring) = chunk.docstring() {
            prompt.push_str(&format!("Docstring: {}\n", flatten_whitespace(docstring)));
        }
        if !chunk.parameters().is_empty() {
            prompt.push_str(&format!("Parameters: {}\n", chunk.parameters().join(", ")));
        }
        prompt.push_str("\nCode:\n");
        prompt.push_str(chunk.content());

        match self.complete(SYMBOL_SYSTEM, &prompt, SYMBOL_MAX_TOKENS).await {
            Some(text) => Summary {
                text,
                degraded: false,
            },
            None => Summary {
                text: mechanical_symbol_summary(chunk),
                degraded: true,
            },
        }
    }

    /// File summary from the metadata chunk plus either the whole-file chunk
    /// (small files) or the symbol summaries in source order (large files).
    /// Returns the summary and whether the input was budget-truncated.
    pub async fn summarize_file(
        &self,
        group: &FileChunks,
        symbol_summaries: &[(String, String)],
    ) -> (Summary, bool) {
        let budget = self.config.summary_input_budget_tokens;
        let mut truncated = false;

        let mut prompt = format!("File: {} ({})\n", group.path(), group.language());
        let meta = group.metadata();
        prompt.push_str(&format!(
            "Top-level functions: {}, classes: {}\n",
            meta.function_count(),
            meta.class_count()
        ));
        if let Some(docstring) = meta.module_docstring() {
            prompt.push_str(&format!(
                "Module docstring: {}\n",
                flatten_whitespace(docstring)
            ));
        }

        if let Some(whole) = group.whole_file() {
            prompt.push_str("\nSource:\n");
            let remaining = budget.saturating_sub(estimate_tokens(prompt.len()));
            let (body, cut) = crate::domain::truncate_to_tokens(whole.content(), remaining.max(1));
            truncated = cut;
            prompt.push_str(&body);
        } else {
            let (kept, cut) = fit_entries(symbol_summaries, budget.saturating_sub(estimate_tokens(prompt.len())));
            truncated = cut;
            prompt.push_str("\nMembers:\n");
            for (name, summary) in kept {
                prompt.push_str(&format!("- {}: {}\n", name, summary));
            }
            prompt.push_str("\nFile head:\n");
            let remaining = budget.saturating_sub(estimate_tokens(prompt.len()));
            let (head, _) = crate::domain::truncate_to_tokens(meta.head(), remaining.max(1));
            prompt.push_str(&head);
        }

        let summary = match self.complete(FILE_SYSTEM, &prompt, FILE_MAX_TOKENS).await {
            Some(text) => Summary {
                text,
                degraded: false,
            },
            None => Summary {
                text: mechanical_file_summary(group, symbol_summaries),
                degraded: true,
            },
        };
        (summary, truncated)
    }

    /// Module summary from `(name, summary)` entries of member files and
    /// subfolders, already ordered lexicographically by path.
    pub async fn summarize_module(
        &self,
        folder: &str,
        children: &[(String, String)],
    ) -> (Summary, bool) {
        let display = if folder.is_empty() { "<root>" } else { folder };
        let mut prompt = format!("Folder: {}\n\nMembers:\n", display);
        let budget = self
            .config
            .summary_input_budget_tokens
            .saturating_sub(estimate_tokens(prompt.len()));
        let (kept, truncated) = fit_entries(children, budget);
        for (name, summary) in kept {
            prompt.push_str(&format!("- {}: {}\n", name, summary));
        }

        let summary = match self.complete(MODULE_SYSTEM, &prompt, MODULE_MAX_TOKENS).await {
            Some(text) => Summary {
                text,
                degraded: false,
            },
            None => Summary {
                text: mechanical_aggregate_summary(display, children),
                degraded: true,
            },
        };
        (summary, truncated)
    }

    /// Repo summary from top-level module entries plus the derived language
    /// list.
    pub async fn summarize_repo(
        &self,
        repo_id: &str,
        modules: &[(String, String)],
        languages: &[String],
    ) -> (Summary, bool) {
        let mut prompt = format!(
            "Repository: {}\nPrimary languages: {}\n\nModules:\n",
            repo_id,
            languages.join(", ")
        );
        let budget = self
            .config
            .summary_input_budget_tokens
            .saturating_sub(estimate_tokens(prompt.len()));
        let (kept, truncated) = fit_entries(modules, budget);
        for (name, summary) in kept {
            let display = if name.is_empty() { "<root>" } else { name };
            prompt.push_str(&format!("- {}: {}\n", display, summary));
        }

        let summary = match self.complete(REPO_SYSTEM, &prompt, REPO_MAX_TOKENS).await {
            Some(text) => Summary {
                text,
                degraded: false,
            },
            None => Summary {
                text: mechanical_aggregate_summary(repo_id, modules),
                degraded: true,
            },
        };
        (summary, truncated)
    }

    /// Call the LLM with retry. `None` means every attempt failed or the
    /// response carried no prose; callers fall back to a mechanical summary.
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Option<String> {
        let mut attempt = 0u32;
        loop {
            match self.chat.complete(system, user, max_tokens).await {
                Ok(response) => {
                    return match extract_prose(&response) {
                        Some(text) => Some(text),
                        None => {
                            warn!("LLM returned no usable prose; degrading summary");
                            None
                        }
                    };
                }
                Err(e) if e.is_transient() && attempt + 1 < self.config.llm_max_retries => {
                    let delay = backoff_delay(
                        attempt,
                        self.config.llm_backoff_base_ms,
                        self.config.llm_backoff_cap_ms,
                    );
                    debug!(
                        "LLM attempt {} failed ({}); retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("LLM call failed after {} attempts: {}", attempt + 1, e);
                    return None;
                }
            }
        }
    }
}

pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(exp.min(cap_ms))
}

/// Keep what fits the token budget. Over budget, children are reduced to the
/// first half and last half of the (already ordered) list, shrinking from
/// the middle until the assembly fits. Returns the kept slice refs and
/// whether anything was dropped.
fn fit_entries(entries: &[(String, String)], budget_tokens: usize) -> (Vec<&(String, String)>, bool) {
    let entry_tokens = |e: &(String, String)| estimate_tokens(e.0.len() + e.1.len() + 4);
    let total: usize = entries.iter().map(entry_tokens).sum();
    if total <= budget_tokens {
        return (entries.iter().collect(), false);
    }

    for keep in (1..entries.len()).rev() {
        let head = keep / 2 + keep % 2;
        let tail = keep / 2;
        let kept: Vec<&(String, String)> = entries[..head]
            .iter()
            .chain(entries[entries.len() - tail..].iter())
            .collect();
        let size: usize = kept.iter().map(|e| entry_tokens(e)).sum();
        if size <= budget_tokens {
            return (kept, true);
        }
    }
    (entries.iter().take(1).collect(), true)
}

fn flatten_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip markdown structure; `None` when nothing prose-like remains.
fn extract_prose(response: &str) -> Option<String> {
    let mut out = String::new();
    let mut in_fence = false;
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let stripped = trimmed
            .trim_start_matches(['#', '>', '*', '-'])
            .trim();
        if stripped.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(stripped);
    }
    let out = out.trim().to_string();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn mechanical_symbol_summary(chunk: &RawChunk) -> String {
    let name = chunk.symbol_name().unwrap_or("<anonymous>");
    match chunk.docstring() {
        Some(doc) => format!(
            "{} `{}` in {}: {}",
            chunk.kind().as_str(),
            name,
            chunk.path(),
            doc
        ),
        None => format!(
            "{} `{}` in {} spanning lines {}-{} with signature {}",
            chunk.kind().as_str(),
            name,
            chunk.path(),
            chunk.start_line(),
            chunk.end_line(),
            chunk.signature()
        ),
    }
}

fn mechanical_file_summary(group: &FileChunks, symbol_summaries: &[(String, String)]) -> String {
    let meta = group.metadata();
    let names: Vec<&str> = symbol_summaries
        .iter()
        .take(10)
        .map(|(name, _)| name.as_str())
        .collect();
    let mut text = format!(
        "{} source file {} with {} lines, {} top-level functions and {} classes.",
        group.language(),
        group.path(),
        group.line_count(),
        meta.function_count(),
        meta.class_count()
    );
    if let Some(docstring) = meta.module_docstring() {
        text.push_str(&format!(" {}", docstring));
    }
    if !names.is_empty() {
        text.push_str(&format!(" Defines {}.", names.join(", ")));
    }
    text
}

fn mechanical_aggregate_summary(name: &str, children: &[(String, String)]) -> String {
    let members: Vec<&str> = children
        .iter()
        .take(12)
        .map(|(child, _)| {
            if child.is_empty() {
                "<root>"
            } else {
                child.as_str()
            }
        })
        .collect();
    format!(
        "{} containing {} members: {}.",
        name,
        children.len(),
        members.join(", ")
    )
}
