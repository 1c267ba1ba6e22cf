use serde::{Deserialize, Serialize};

use super::Language;

/// Spec'd token estimate for source text: ≈ 0.75 tokens per byte.
pub fn estimate_tokens(bytes: usize) -> usize {
    (bytes as f64 * 0.75) as usize
}

/// Truncate text so its estimated token count stays within `max_tokens`,
/// cutting at a whitespace boundary where possible.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    let max_bytes = (max_tokens as f64 / 0.75) as usize;
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &text[..cut];
    let boundary = head.rfind(char::is_whitespace).unwrap_or(cut);
    (text[..boundary].to_string(), true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    WholeFile,
    Function,
    ClassHeader,
    Method,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::WholeFile => "whole_file",
            ChunkKind::Function => "function",
            ChunkKind::ClassHeader => "class_header",
            ChunkKind::Method => "method",
        }
    }

    pub fn is_symbol(&self) -> bool {
        !matches!(self, ChunkKind::WholeFile)
    }
}

/// A source span produced by the chunker. Becomes at most one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChunk {
    path: String,
    language: Language,
    start_line: u32,
    end_line: u32,
    kind: ChunkKind,
    symbol_name: Option<String>,
    parent_symbol: Option<String>,
    docstring: Option<String>,
    decorators: Vec<String>,
    parameters: Vec<String>,
    content: String,
}

impl RawChunk {
    pub fn new(
        path: impl Into<String>,
        language: Language,
        start_line: u32,
        end_line: u32,
        kind: ChunkKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            language,
            start_line,
            end_line,
            kind,
            symbol_name: None,
            parent_symbol: None,
            docstring: None,
            decorators: Vec::new(),
            parameters: Vec::new(),
            content: content.into(),
        }
    }

    pub fn with_symbol_name(mut self, name: impl Into<String>) -> Self {
        self.symbol_name = Some(name.into());
        self
    }

    pub fn with_parent_symbol(mut self, parent: impl Into<String>) -> Self {
        self.parent_symbol = Some(parent.into());
        self
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    pub fn with_decorators(mut self, decorators: Vec<String>) -> Self {
        self.decorators = decorators;
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn symbol_name(&self) -> Option<&str> {
        self.symbol_name.as_deref()
    }

    pub fn parent_symbol(&self) -> Option<&str> {
        self.parent_symbol.as_deref()
    }

    pub fn docstring(&self) -> Option<&str> {
        self.docstring.as_deref()
    }

    pub fn decorators(&self) -> &[String] {
        &self.decorators
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Signature line used in summarizer prompts: decorators + first line.
    pub fn signature(&self) -> String {
        let first_line = self.content.lines().next().unwrap_or_default().trim();
        if self.decorators.is_empty() {
            first_line.to_string()
        } else {
            format!("{} {}", self.decorators.join(" "), first_line)
        }
    }
}

/// The metadata chunk emitted first for every retained file: a capped head of
/// the source plus top-level counts and the module docstring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataChunk {
    head: String,
    function_count: u32,
    class_count: u32,
    module_docstring: Option<String>,
}

impl MetadataChunk {
    pub fn new(
        head: impl Into<String>,
        function_count: u32,
        class_count: u32,
        module_docstring: Option<String>,
    ) -> Self {
        Self {
            head: head.into(),
            function_count,
            class_count,
            module_docstring,
        }
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    pub fn function_count(&self) -> u32 {
        self.function_count
    }

    pub fn class_count(&self) -> u32 {
        self.class_count
    }

    pub fn module_docstring(&self) -> Option<&str> {
        self.module_docstring.as_deref()
    }
}

/// File-granular chunk group flowing from the walker into the reconciler and
/// summarizer. This is the unit of change detection and of progress reporting.
#[derive(Debug, Clone)]
pub struct FileChunks {
    path: String,
    language: Language,
    file_commit: String,
    line_count: u32,
    parse_degraded: bool,
    truncated: bool,
    metadata: MetadataChunk,
    whole_file: Option<RawChunk>,
    symbols: Vec<RawChunk>,
}

impl FileChunks {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: impl Into<String>,
        language: Language,
        file_commit: impl Into<String>,
        line_count: u32,
        metadata: MetadataChunk,
        whole_file: Option<RawChunk>,
        symbols: Vec<RawChunk>,
    ) -> Self {
        Self {
            path: path.into(),
            language,
            file_commit: file_commit.into(),
            line_count,
            parse_degraded: false,
            truncated: false,
            metadata,
            whole_file,
            symbols,
        }
    }

    pub fn mark_parse_degraded(mut self) -> Self {
        self.parse_degraded = true;
        self
    }

    pub fn mark_truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn file_commit(&self) -> &str {
        &self.file_commit
    }

    pub fn line_count(&self) -> u32 {
        self.line_count
    }

    pub fn parse_degraded(&self) -> bool {
        self.parse_degraded
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn metadata(&self) -> &MetadataChunk {
        &self.metadata
    }

    pub fn whole_file(&self) -> Option<&RawChunk> {
        self.whole_file.as_ref()
    }

    pub fn symbols(&self) -> &[RawChunk] {
        &self.symbols
    }

    /// Total chunks carried by this file (metadata excluded).
    pub fn chunk_count(&self) -> usize {
        self.symbols.len() + usize::from(self.whole_file.is_some())
    }
}
