use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::EmbeddingService;
use crate::domain::DomainError;

pub const DEFAULT_EMBED_BASE_URL: &str = "http://localhost:8080";
const EMBED_PATH: &str = "/embed";

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP embedding backend: `POST /embed {input: [texts]}` →
/// `{embeddings: [[f32]]}`.
///
/// The server is expected to honor the `"search_document:"` /
/// `"search_query:"` prefix convention; the pipeline still re-normalizes
/// every vector at its own boundary, so a backend that forgets
/// `normalize_embeddings` cannot corrupt the index.
pub struct HttpEmbedding {
    client: reqwest::Client,
    url: String,
    dimensions: usize,
}

impl HttpEmbedding {
    pub fn new(base_url: impl Into<String>, dimensions: usize) -> Self {
        let base: String = base_url.into();
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            url: format!("{}{}", base.trim_end_matches('/'), EMBED_PATH),
            dimensions,
        }
    }

    pub fn from_env(dimensions: usize) -> Self {
        let base = std::env::var("CODESMRITI_EMBED_URL")
            .unwrap_or_else(|_| DEFAULT_EMBED_BASE_URL.to_string());
        Self::new(base, dimensions)
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbedding {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest { input: texts })
            .send()
            .await
            .map_err(|e| DomainError::embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DomainError::embedding(format!(
                "Endpoint returned {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| DomainError::embedding(format!("Failed to parse response: {}", e)))?;

        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
