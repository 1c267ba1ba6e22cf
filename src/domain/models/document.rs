use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Language;
use crate::domain::error::DomainError;

/// Tolerance for the unit-vector invariant: `|‖e‖₂ − 1| < 1e-3`.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Minimum summary length (bytes) for a document to be returned by search.
pub const MIN_SUMMARY_BYTES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    RepoSummary,
    ModuleSummary,
    FileIndex,
    SymbolIndex,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::RepoSummary => "repo_summary",
            DocumentKind::ModuleSummary => "module_summary",
            DocumentKind::FileIndex => "file_index",
            DocumentKind::SymbolIndex => "symbol_index",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "repo_summary" => Some(DocumentKind::RepoSummary),
            "module_summary" => Some(DocumentKind::ModuleSummary),
            "file_index" => Some(DocumentKind::FileIndex),
            "symbol_index" => Some(DocumentKind::SymbolIndex),
            _ => None,
        }
    }

    /// Document kinds a valid parent may have. The root module's parent is
    /// the repo; nested modules point at their enclosing module.
    pub fn valid_parent_kinds(&self) -> &'static [DocumentKind] {
        match self {
            DocumentKind::RepoSummary => &[],
            DocumentKind::ModuleSummary => {
                &[DocumentKind::RepoSummary, DocumentKind::ModuleSummary]
            }
            DocumentKind::FileIndex => &[DocumentKind::ModuleSummary],
            DocumentKind::SymbolIndex => &[DocumentKind::FileIndex],
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-kind attributes. Keeping these in a tagged enum guarantees a document
/// can never carry attributes of the wrong kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "doc", rename_all = "snake_case")]
pub enum DocumentMeta {
    Repo {
        languages: Vec<String>,
        doc_counts: BTreeMap<String, u64>,
    },
    Module {
        path: String,
    },
    File {
        path: String,
        language: Language,
        line_count: u32,
        file_commit: String,
    },
    Symbol {
        path: String,
        symbol_name: String,
        symbol_kind: SymbolKind,
        start_line: u32,
        end_line: u32,
        parent_class: Option<String>,
    },
}

/// One record of the four-kind hierarchy: repo → module → file → symbol.
///
/// Raw source is never stored here; only the summary and provenance metadata.
/// Source code is re-read from the on-disk checkout on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    id: String,
    tenant_id: String,
    repo_id: String,
    kind: DocumentKind,
    summary_text: String,
    embedding: Option<Vec<f32>>,
    parent_id: Option<String>,
    children_ids: Vec<String>,
    content_hash: String,
    created_at: i64,
    updated_at: i64,
    aggregation_truncated: bool,
    summary_degraded: bool,
    parse_degraded: bool,
    meta: DocumentMeta,
}

/// Canonical symbol name: `Class.method` for methods, the bare name otherwise.
pub fn canonical_symbol_name(name: &str, parent_class: Option<&str>) -> String {
    match parent_class {
        Some(class) => format!("{}.{}", class, name),
        None => name.to_string(),
    }
}

pub fn repo_doc_id(tenant_id: &str, repo_id: &str) -> String {
    format!("{}:{}:repo_summary:root", tenant_id, repo_id)
}

pub fn module_doc_id(tenant_id: &str, repo_id: &str, folder: &str) -> String {
    format!("{}:{}:module_summary:{}", tenant_id, repo_id, folder)
}

pub fn file_doc_id(tenant_id: &str, repo_id: &str, path: &str) -> String {
    format!("{}:{}:file_index:{}", tenant_id, repo_id, path)
}

pub fn symbol_doc_id(tenant_id: &str, repo_id: &str, path: &str, canonical: &str) -> String {
    format!("{}:{}:symbol_index:{}#{}", tenant_id, repo_id, path, canonical)
}

/// Parent folder of a path within the repository.
///
/// `"a/b/c.py"` → `Some("a/b")`, `"c.py"` → `Some("")`, `""` → `None`.
pub fn parent_folder(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(idx) => Some(path[..idx].to_string()),
        None => Some(String::new()),
    }
}

pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Document {
    pub fn repo_summary(tenant_id: impl Into<String>, repo_id: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        let repo_id = repo_id.into();
        let id = repo_doc_id(&tenant_id, &repo_id);
        let now = current_timestamp();
        Self {
            id,
            tenant_id,
            repo_id,
            kind: DocumentKind::RepoSummary,
            summary_text: String::new(),
            embedding: None,
            parent_id: None,
            children_ids: Vec::new(),
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
            aggregation_truncated: false,
            summary_degraded: false,
            parse_degraded: false,
            meta: DocumentMeta::Repo {
                languages: Vec::new(),
                doc_counts: BTreeMap::new(),
            },
        }
    }

    pub fn module_summary(
        tenant_id: impl Into<String>,
        repo_id: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        let tenant_id = tenant_id.into();
        let repo_id = repo_id.into();
        let folder = folder.into();
        let id = module_doc_id(&tenant_id, &repo_id, &folder);
        let parent_id = match parent_folder(&folder) {
            Some(parent) => module_doc_id(&tenant_id, &repo_id, &parent),
            None => repo_doc_id(&tenant_id, &repo_id),
        };
        let now = current_timestamp();
        Self {
            id,
            tenant_id,
            repo_id,
            kind: DocumentKind::ModuleSummary,
            summary_text: String::new(),
            embedding: None,
            parent_id: Some(parent_id),
            children_ids: Vec::new(),
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
            aggregation_truncated: false,
            summary_degraded: false,
            parse_degraded: false,
            meta: DocumentMeta::Module { path: folder },
        }
    }

    pub fn file_index(
        tenant_id: impl Into<String>,
        repo_id: impl Into<String>,
        path: impl Into<String>,
        language: Language,
        line_count: u32,
        file_commit: impl Into<String>,
    ) -> Self {
        let tenant_id = tenant_id.into();
        let repo_id = repo_id.into();
        let path = path.into();
        let id = file_doc_id(&tenant_id, &repo_id, &path);
        let folder = parent_folder(&path).unwrap_or_default();
        let parent_id = module_doc_id(&tenant_id, &repo_id, &folder);
        let now = current_timestamp();
        Self {
            id,
            tenant_id,
            repo_id,
            kind: DocumentKind::FileIndex,
            summary_text: String::new(),
            embedding: None,
            parent_id: Some(parent_id),
            children_ids: Vec::new(),
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
            aggregation_truncated: false,
            summary_degraded: false,
            parse_degraded: false,
            meta: DocumentMeta::File {
                path,
                language,
                line_count,
                file_commit: file_commit.into(),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn symbol_index(
        tenant_id: impl Into<String>,
        repo_id: impl Into<String>,
        path: impl Into<String>,
        symbol_name: impl Into<String>,
        symbol_kind: SymbolKind,
        start_line: u32,
        end_line: u32,
        parent_class: Option<String>,
    ) -> Self {
        let tenant_id = tenant_id.into();
        let repo_id = repo_id.into();
        let path = path.into();
        let symbol_name = symbol_name.into();
        let canonical = canonical_symbol_name(&symbol_name, parent_class.as_deref());
        let id = symbol_doc_id(&tenant_id, &repo_id, &path, &canonical);
        let parent_id = file_doc_id(&tenant_id, &repo_id, &path);
        let now = current_timestamp();
        Self {
            id,
            tenant_id,
            repo_id,
            kind: DocumentKind::SymbolIndex,
            summary_text: String::new(),
            embedding: None,
            parent_id: Some(parent_id),
            children_ids: Vec::new(),
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
            aggregation_truncated: false,
            summary_degraded: false,
            parse_degraded: false,
            meta: DocumentMeta::Symbol {
                path,
                symbol_name,
                symbol_kind,
                start_line,
                end_line,
                parent_class,
            },
        }
    }

    /// Reconstitutes from persisted data (used by adapters).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: String,
        tenant_id: String,
        repo_id: String,
        kind: DocumentKind,
        summary_text: String,
        embedding: Option<Vec<f32>>,
        parent_id: Option<String>,
        children_ids: Vec<String>,
        content_hash: String,
        created_at: i64,
        updated_at: i64,
        aggregation_truncated: bool,
        summary_degraded: bool,
        parse_degraded: bool,
        meta: DocumentMeta,
    ) -> Self {
        Self {
            id,
            tenant_id,
            repo_id,
            kind,
            summary_text,
            embedding,
            parent_id,
            children_ids,
            content_hash,
            created_at,
            updated_at,
            aggregation_truncated,
            summary_degraded,
            parse_degraded,
            meta,
        }
    }

    pub fn with_summary(mut self, text: impl Into<String>) -> Self {
        self.summary_text = text.into();
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = hash.into();
        self
    }

    pub fn with_children(mut self, children_ids: Vec<String>) -> Self {
        self.children_ids = children_ids;
        self
    }

    pub fn with_repo_stats(
        mut self,
        languages: Vec<String>,
        doc_counts: BTreeMap<String, u64>,
    ) -> Self {
        if let DocumentMeta::Repo {
            languages: langs,
            doc_counts: counts,
        } = &mut self.meta
        {
            *langs = languages;
            *counts = doc_counts;
        }
        self
    }

    pub fn mark_truncated(mut self) -> Self {
        self.aggregation_truncated = true;
        self
    }

    pub fn mark_degraded(mut self) -> Self {
        self.summary_degraded = true;
        self
    }

    pub fn mark_parse_degraded(mut self) -> Self {
        self.parse_degraded = true;
        self
    }

    pub fn set_embedding(&mut self, vector: Vec<f32>) {
        self.embedding = Some(vector);
    }

    pub fn touch(&mut self) {
        self.updated_at = current_timestamp();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn summary_text(&self) -> &str {
        &self.summary_text
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn children_ids(&self) -> &[String] {
        &self.children_ids
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn aggregation_truncated(&self) -> bool {
        self.aggregation_truncated
    }

    pub fn summary_degraded(&self) -> bool {
        self.summary_degraded
    }

    pub fn parse_degraded(&self) -> bool {
        self.parse_degraded
    }

    pub fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    /// Source path for module/file/symbol documents.
    pub fn path(&self) -> Option<&str> {
        match &self.meta {
            DocumentMeta::Repo { .. } => None,
            DocumentMeta::Module { path } => Some(path),
            DocumentMeta::File { path, .. } => Some(path),
            DocumentMeta::Symbol { path, .. } => Some(path),
        }
    }

    pub fn language(&self) -> Option<Language> {
        match &self.meta {
            DocumentMeta::File { language, .. } => Some(*language),
            _ => None,
        }
    }

    pub fn line_count(&self) -> Option<u32> {
        match &self.meta {
            DocumentMeta::File { line_count, .. } => Some(*line_count),
            _ => None,
        }
    }

    pub fn file_commit(&self) -> Option<&str> {
        match &self.meta {
            DocumentMeta::File { file_commit, .. } => Some(file_commit),
            _ => None,
        }
    }

    pub fn symbol_name(&self) -> Option<&str> {
        match &self.meta {
            DocumentMeta::Symbol { symbol_name, .. } => Some(symbol_name),
            _ => None,
        }
    }

    pub fn symbol_kind(&self) -> Option<SymbolKind> {
        match &self.meta {
            DocumentMeta::Symbol { symbol_kind, .. } => Some(*symbol_kind),
            _ => None,
        }
    }

    pub fn canonical_name(&self) -> Option<String> {
        match &self.meta {
            DocumentMeta::Symbol {
                symbol_name,
                parent_class,
                ..
            } => Some(canonical_symbol_name(symbol_name, parent_class.as_deref())),
            _ => None,
        }
    }

    pub fn languages(&self) -> Option<&[String]> {
        match &self.meta {
            DocumentMeta::Repo { languages, .. } => Some(languages),
            _ => None,
        }
    }

    pub fn doc_counts(&self) -> Option<&BTreeMap<String, u64>> {
        match &self.meta {
            DocumentMeta::Repo { doc_counts, .. } => Some(doc_counts),
            _ => None,
        }
    }

    /// Enforce the data-model invariants before a write.
    ///
    /// A document that fails here must never reach the store.
    pub fn validate(&self, expected_dims: usize) -> Result<(), DomainError> {
        let vector = self.embedding.as_deref().ok_or_else(|| {
            DomainError::invariant(format!("document {} has no embedding", self.id))
        })?;

        if vector.len() != expected_dims {
            return Err(DomainError::invariant(format!(
                "document {} embedding has {} dims, expected {}",
                self.id,
                vector.len(),
                expected_dims
            )));
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if (norm - 1.0).abs() >= UNIT_NORM_TOLERANCE {
            return Err(DomainError::invariant(format!(
                "document {} embedding norm {} outside unit tolerance",
                self.id, norm
            )));
        }

        if self.kind != DocumentKind::RepoSummary && self.parent_id.is_none() {
            return Err(DomainError::invariant(format!(
                "non-repo document {} has no parent_id",
                self.id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_ids() {
        let symbol = Document::symbol_index(
            "acme",
            "owner/repo",
            "pkg/util.py",
            "hello",
            SymbolKind::Method,
            10,
            20,
            Some("Greeter".to_string()),
        );
        assert_eq!(
            symbol.id(),
            "acme:owner/repo:symbol_index:pkg/util.py#Greeter.hello"
        );
        assert_eq!(
            symbol.parent_id(),
            Some("acme:owner/repo:file_index:pkg/util.py")
        );
    }

    #[test]
    fn test_file_parent_is_enclosing_module() {
        let file = Document::file_index("t", "r", "a/b/c.py", Language::Python, 10, "abc");
        assert_eq!(file.parent_id(), Some("t:r:module_summary:a/b"));

        let root_file = Document::file_index("t", "r", "c.py", Language::Python, 10, "abc");
        assert_eq!(root_file.parent_id(), Some("t:r:module_summary:"));
    }

    #[test]
    fn test_module_parent_chain_ends_at_repo() {
        let nested = Document::module_summary("t", "r", "a/b");
        assert_eq!(nested.parent_id(), Some("t:r:module_summary:a"));

        let top = Document::module_summary("t", "r", "a");
        assert_eq!(top.parent_id(), Some("t:r:module_summary:"));

        let root = Document::module_summary("t", "r", "");
        assert_eq!(root.parent_id(), Some("t:r:repo_summary:root"));

        let repo = Document::repo_summary("t", "r");
        assert_eq!(repo.parent_id(), None);
    }

    #[test]
    fn test_parent_folder() {
        assert_eq!(parent_folder("a/b/c.py").as_deref(), Some("a/b"));
        assert_eq!(parent_folder("c.py").as_deref(), Some(""));
        assert_eq!(parent_folder(""), None);
    }

    #[test]
    fn test_validate_rejects_non_unit_embedding() {
        let mut doc = Document::file_index("t", "r", "x.py", Language::Python, 1, "h")
            .with_summary("a file summary long enough to be stored safely");
        doc.set_embedding(vec![0.5, 0.5]);
        assert!(doc.validate(2).unwrap_err().is_invariant_violation());

        let inv = 1.0 / 2.0_f32.sqrt();
        doc.set_embedding(vec![inv, inv]);
        assert!(doc.validate(2).is_ok());
        assert!(doc.validate(3).is_err());
    }

    #[test]
    fn test_validate_requires_embedding() {
        let doc = Document::repo_summary("t", "r");
        assert!(doc.validate(2).is_err());
    }

    #[test]
    fn test_canonical_symbol_name() {
        assert_eq!(canonical_symbol_name("add", None), "add");
        assert_eq!(canonical_symbol_name("hello", Some("Greeter")), "Greeter.hello");
    }
}
