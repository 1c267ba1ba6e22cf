use std::sync::Arc;

use tracing::debug;

use crate::application::EmbeddingService;
use crate::domain::{Document, DomainError, EngineConfig};

pub const DOCUMENT_PREFIX: &str = "search_document: ";
pub const QUERY_PREFIX: &str = "search_query: ";

/// Turns summaries into unit vectors.
///
/// Prefixing, truncation, L2 normalization, and the fixed-dims check all
/// happen here, at the pipeline boundary, so any [`EmbeddingService`]
/// backend can be substituted safely.
pub struct EmbeddingBatcher {
    service: Arc<dyn EmbeddingService>,
    config: Arc<EngineConfig>,
}

impl EmbeddingBatcher {
    pub fn new(service: Arc<dyn EmbeddingService>, config: Arc<EngineConfig>) -> Self {
        Self { service, config }
    }

    /// Embed a batch of documents in place, `embed_batch_size` at a time.
    ///
    /// String assembly for the next batch overlaps the encoder call for the
    /// current one; the encoder itself is serialized.
    pub async fn embed_documents(&self, documents: &mut [Document]) -> Result<(), DomainError> {
        if documents.is_empty() {
            return Ok(());
        }

        let batch_size = self.config.embed_batch_size.max(1);
        let max_bytes = self.config.max_embed_input_bytes;

        let ranges: Vec<std::ops::Range<usize>> = (0..documents.len())
            .step_by(batch_size)
            .map(|start| start..(start + batch_size).min(documents.len()))
            .collect();

        let mut prepared: Vec<String> = documents[ranges[0].clone()]
            .iter()
            .map(|d| prepare_text(DOCUMENT_PREFIX, d.summary_text(), max_bytes))
            .collect();

        for (i, range) in ranges.iter().enumerate() {
            let next_texts: Option<tokio::task::JoinHandle<Vec<String>>> =
                ranges.get(i + 1).map(|next_range| {
                    let texts: Vec<String> = documents[next_range.clone()]
                        .iter()
                        .map(|d| d.summary_text().to_string())
                        .collect();
                    tokio::task::spawn_blocking(move || {
                        texts
                            .iter()
                            .map(|t| prepare_text(DOCUMENT_PREFIX, t, max_bytes))
                            .collect()
                    })
                });

            let vectors = self.service.encode_batch(&prepared).await?;
            if vectors.len() != prepared.len() {
                return Err(DomainError::embedding(format!(
                    "Encoder returned {} vectors for {} inputs",
                    vectors.len(),
                    prepared.len()
                )));
            }

            for (doc, mut vector) in documents[range.clone()].iter_mut().zip(vectors) {
                self.finalize_vector(&mut vector)?;
                doc.set_embedding(vector);
            }
            debug!("Embedded batch of {} documents", range.len());

            prepared = match next_texts {
                Some(handle) => handle
                    .await
                    .map_err(|e| DomainError::internal(format!("Prep task failed: {}", e)))?,
                None => Vec::new(),
            };
        }

        Ok(())
    }

    /// Query-side path: same model, `"search_query: "` prefix, same
    /// normalization invariant.
    pub async fn encode_query(&self, query_text: &str) -> Result<Vec<f32>, DomainError> {
        let prepared = prepare_text(QUERY_PREFIX, query_text, self.config.max_embed_input_bytes);
        let mut vectors = self.service.encode_batch(&[prepared]).await?;
        let mut vector = vectors
            .pop()
            .ok_or_else(|| DomainError::embedding("Encoder returned no vector for query"))?;
        self.finalize_vector(&mut vector)?;
        Ok(vector)
    }

    /// Normalize and enforce the fixed-dims invariant. Wrong dimensionality
    /// is fatal for the pipeline, never silently padded.
    fn finalize_vector(&self, vector: &mut [f32]) -> Result<(), DomainError> {
        if vector.len() != self.config.embed_dims {
            return Err(DomainError::invariant(format!(
                "Embedding has {} dims, configured {}",
                vector.len(),
                self.config.embed_dims
            )));
        }
        l2_normalize(vector)
    }
}

pub fn l2_normalize(vector: &mut [f32]) -> Result<(), DomainError> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(DomainError::invariant(
            "Embedding has zero or non-finite norm",
        ));
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

/// Prefix and cap at a whitespace boundary.
fn prepare_text(prefix: &str, text: &str, max_bytes: usize) -> String {
    let budget = max_bytes.saturating_sub(prefix.len());
    if text.len() <= budget {
        return format!("{}{}", prefix, text);
    }
    let mut cut = budget;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &text[..cut];
    let boundary = head.rfind(char::is_whitespace).unwrap_or(cut);
    format!("{}{}", prefix, &text[..boundary])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_text_prefixes() {
        assert_eq!(
            prepare_text(QUERY_PREFIX, "find the parser", 1024),
            "search_query: find the parser"
        );
    }

    #[test]
    fn test_prepare_text_truncates_at_whitespace() {
        let text = "alpha beta gamma delta epsilon";
        let prepared = prepare_text(DOCUMENT_PREFIX, text, DOCUMENT_PREFIX.len() + 12);
        assert_eq!(prepared, "search_document: alpha beta");
    }

    #[test]
    fn test_l2_normalize() {
        let mut vector = vec![3.0, 4.0];
        l2_normalize(&mut vector).unwrap();
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        assert!(l2_normalize(&mut zero).unwrap_err().is_invariant_violation());
    }
}
