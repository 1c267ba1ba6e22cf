use crate::domain::{DomainError, Language, RawChunk};

/// Parses source into symbol chunks. Implementations are a registry keyed by
/// language; adding a language means registering a grammar, not subclassing.
pub trait ChunkerService: Send + Sync {
    /// Extract symbol chunks (top-level functions, class headers, methods)
    /// from one file. Nested classes recurse.
    fn chunk(
        &self,
        source: &str,
        path: &str,
        language: Language,
    ) -> Result<Vec<RawChunk>, DomainError>;

    fn supported_languages(&self) -> Vec<Language>;

    fn supports_language(&self, language: Language) -> bool {
        self.supported_languages().contains(&language)
    }
}
