use serde::{Deserialize, Serialize};

use super::{Document, DocumentKind, Language};

/// The document kind a search query targets. `Doc` routes to module
/// summaries, where conceptual material lives after rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchLevel {
    Symbol,
    File,
    Module,
    Repo,
    Doc,
}

impl SearchLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchLevel::Symbol => "symbol",
            SearchLevel::File => "file",
            SearchLevel::Module => "module",
            SearchLevel::Repo => "repo",
            SearchLevel::Doc => "doc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "symbol" => Some(SearchLevel::Symbol),
            "file" => Some(SearchLevel::File),
            "module" => Some(SearchLevel::Module),
            "repo" => Some(SearchLevel::Repo),
            "doc" => Some(SearchLevel::Doc),
            _ => None,
        }
    }

    pub fn document_kind(&self) -> DocumentKind {
        match self {
            SearchLevel::Symbol => DocumentKind::SymbolIndex,
            SearchLevel::File => DocumentKind::FileIndex,
            SearchLevel::Module | SearchLevel::Doc => DocumentKind::ModuleSummary,
            SearchLevel::Repo => DocumentKind::RepoSummary,
        }
    }
}

impl std::fmt::Display for SearchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    tenant_id: String,
    query_text: String,
    level: Option<SearchLevel>,
    limit: usize,
    repo_filter: Option<String>,
    preview_mode: bool,
}

impl SearchRequest {
    pub fn new(tenant_id: impl Into<String>, query_text: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            query_text: query_text.into(),
            level: None,
            limit: 10,
            repo_filter: None,
            preview_mode: false,
        }
    }

    pub fn with_level(mut self, level: SearchLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_repo_filter(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_filter = Some(repo_id.into());
        self
    }

    pub fn with_preview_mode(mut self, preview: bool) -> Self {
        self.preview_mode = preview;
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn level(&self) -> Option<SearchLevel> {
        self.level
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn repo_filter(&self) -> Option<&str> {
        self.repo_filter.as_deref()
    }

    pub fn preview_mode(&self) -> bool {
        self.preview_mode
    }
}

/// Keyword-pre-filtered kNN request sent to the document store.
#[derive(Debug, Clone)]
pub struct HybridQuery {
    tenant_id: String,
    kind: DocumentKind,
    repo_id: Option<String>,
    query_vector: Vec<f32>,
    k: usize,
}

impl HybridQuery {
    pub fn new(
        tenant_id: impl Into<String>,
        kind: DocumentKind,
        repo_id: Option<String>,
        query_vector: Vec<f32>,
        k: usize,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            kind,
            repo_id,
            query_vector,
            k: k.max(1),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn repo_id(&self) -> Option<&str> {
        self.repo_id.as_deref()
    }

    pub fn query_vector(&self) -> &[f32] {
        &self.query_vector
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

/// A document with its retrieval score, as returned by the store.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    document: Document,
    score: f32,
}

impl ScoredDocument {
    pub fn new(document: Document, score: f32) -> Self {
        Self { document, score }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn score(&self) -> f32 {
        self.score
    }
}

/// One search hit surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    id: String,
    repo_id: String,
    kind: DocumentKind,
    path: Option<String>,
    symbol_name: Option<String>,
    summary_text: String,
    score: f32,
    truncated_preview: bool,
}

impl SearchHit {
    pub fn from_scored(scored: &ScoredDocument, preview_chars: Option<usize>) -> Self {
        let doc = scored.document();
        let (summary_text, truncated_preview) = match preview_chars {
            Some(max) if doc.summary_text().chars().count() > max => {
                let preview: String = doc.summary_text().chars().take(max).collect();
                (preview, true)
            }
            _ => (doc.summary_text().to_string(), false),
        };
        Self {
            id: doc.id().to_string(),
            repo_id: doc.repo_id().to_string(),
            kind: doc.kind(),
            path: doc.path().map(String::from),
            symbol_name: doc.canonical_name(),
            summary_text,
            score: scored.score(),
            truncated_preview,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn symbol_name(&self) -> Option<&str> {
        self.symbol_name.as_deref()
    }

    pub fn summary_text(&self) -> &str {
        &self.summary_text
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn truncated_preview(&self) -> bool {
        self.truncated_preview
    }

    pub fn display_line(&self) -> String {
        match (&self.path, &self.symbol_name) {
            (Some(path), Some(symbol)) => {
                format!("{}::{} (score: {:.3})", path, symbol, self.score)
            }
            (Some(path), None) => format!("{} (score: {:.3})", path, self.score),
            _ => format!("{} (score: {:.3})", self.repo_id, self.score),
        }
    }
}

/// One indexed repository as reported by `list_repos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoOverview {
    pub repo_id: String,
    pub languages: Vec<String>,
    pub doc_counts: std::collections::BTreeMap<String, u64>,
    pub summary_text: String,
}

/// One file entry inside a structure listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureFile {
    pub path: String,
    pub language: Language,
    pub line_count: u32,
}

/// Folder view synthesized from module_summary and file_index documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureView {
    pub path: String,
    pub directories: Vec<String>,
    pub files: Vec<StructureFile>,
    pub summary: Option<String>,
}

/// A slice of source read back from the on-disk checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSlice {
    pub code: String,
    pub total_lines: u32,
    pub language: Language,
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_routing() {
        assert_eq!(
            SearchLevel::Symbol.document_kind(),
            DocumentKind::SymbolIndex
        );
        assert_eq!(SearchLevel::Doc.document_kind(), DocumentKind::ModuleSummary);
        assert_eq!(SearchLevel::parse("FILE"), Some(SearchLevel::File));
        assert_eq!(SearchLevel::parse("chunk"), None);
    }

    #[test]
    fn test_request_builder() {
        let request = SearchRequest::new("acme", "how does parsing work")
            .with_level(SearchLevel::File)
            .with_limit(0)
            .with_repo_filter("owner/repo")
            .with_preview_mode(true);

        assert_eq!(request.limit(), 1);
        assert_eq!(request.level(), Some(SearchLevel::File));
        assert_eq!(request.repo_filter(), Some("owner/repo"));
        assert!(request.preview_mode());
    }

    #[test]
    fn test_hit_preview_truncation() {
        let doc = Document::file_index("t", "r", "a.py", Language::Python, 3, "h")
            .with_summary("x".repeat(300));
        let scored = ScoredDocument::new(doc, 0.9);

        let hit = SearchHit::from_scored(&scored, Some(200));
        assert_eq!(hit.summary_text().len(), 200);
        assert!(hit.truncated_preview());

        let full = SearchHit::from_scored(&scored, None);
        assert_eq!(full.summary_text().len(), 300);
        assert!(!full.truncated_preview());
    }
}
