use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

use crate::application::EmbeddingService;
use crate::domain::DomainError;

const DEFAULT_DIMENSIONS: usize = 768;

/// Deterministic token-feature embeddings for tests and offline runs.
///
/// Each token contributes a hash-seeded pseudo-random direction; a text's
/// vector is the normalized sum. Texts sharing tokens land close together,
/// so lexical overlap behaves like semantic similarity, and identical texts
/// embed identically (the self-retrieval property).
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn token_vector(&self, token: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let seed = hasher.finish();

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..self.dimensions)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect()
    }

    fn encode_text(&self, text: &str) -> Vec<f32> {
        // The instruction prefixes must not dominate similarity between the
        // document and query spaces.
        let body = text
            .strip_prefix("search_document: ")
            .or_else(|| text.strip_prefix("search_query: "))
            .unwrap_or(text);

        let mut vector = vec![0.0f32; self.dimensions];
        let mut tokens = 0usize;
        for token in body
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let lowered = token.to_lowercase();
            for (slot, value) in vector.iter_mut().zip(self.token_vector(&lowered)) {
                *slot += value;
            }
            tokens += 1;
        }
        if tokens == 0 {
            // Empty input still embeds to something valid.
            vector = self.token_vector("<empty>");
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut vector {
                *x /= magnitude;
            }
        }
        vector
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedding {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.encode_text(t)).collect();
        debug!("Generated {} mock embeddings", vectors.len());
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_identical_text_identical_vector() {
        let service = MockEmbedding::with_dimensions(64);
        let a = service.encode_batch(&["parse the config".into()]).await.unwrap();
        let b = service.encode_batch(&["parse the config".into()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_vectors_are_unit_length() {
        let service = MockEmbedding::with_dimensions(64);
        let vectors = service
            .encode_batch(&["subtract two numbers".into(), "".into()])
            .await
            .unwrap();
        for vector in vectors {
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-3);
        }
    }

    #[tokio::test]
    async fn test_token_overlap_beats_disjoint_text() {
        let service = MockEmbedding::with_dimensions(256);
        let vectors = service
            .encode_batch(&[
                "subtract two numbers".into(),
                "function sub subtract numbers".into(),
                "parse yaml configuration".into(),
            ])
            .await
            .unwrap();
        let overlap = cosine(&vectors[0], &vectors[1]);
        let disjoint = cosine(&vectors[0], &vectors[2]);
        assert!(overlap > disjoint);
    }

    #[tokio::test]
    async fn test_prefixes_share_token_space() {
        let service = MockEmbedding::with_dimensions(128);
        let vectors = service
            .encode_batch(&[
                "search_document: greet the user".into(),
                "search_query: greet the user".into(),
            ])
            .await
            .unwrap();
        assert!(cosine(&vectors[0], &vectors[1]) > 0.999);
    }
}
