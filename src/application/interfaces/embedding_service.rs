use async_trait::async_trait;

use crate::domain::DomainError;

/// Encodes already-prepared text into vectors.
///
/// Prefixing (`"search_document: "` / `"search_query: "`), truncation,
/// normalization, and dimensionality enforcement all live at the pipeline
/// boundary, which makes backend substitution safe.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError>;

    fn dimensions(&self) -> usize;
}
