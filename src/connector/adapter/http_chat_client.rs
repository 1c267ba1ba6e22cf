use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::application::ChatClient;
use crate::domain::DomainError;

pub const DEFAULT_LLM_BASE_URL: &str = "http://localhost:1234";
const COMPLETIONS_PATH: &str = "/v1/chat/completions";
const DEFAULT_MODEL: &str = "qwen2.5-7b-instruct";
const TEMPERATURE: f32 = 0.2;

#[derive(serde::Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(serde::Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: String,
}

/// HTTP client for any chat-completions endpoint honoring the
/// `{model, messages, max_tokens, temperature}` → `{choices[0].message.content}`
/// shape (LM Studio, vLLM, OpenAI-compatible gateways).
///
/// Configure via environment:
///
/// ```text
/// CODESMRITI_LLM_URL=http://localhost:1234
/// CODESMRITI_LLM_MODEL=qwen2.5-7b-instruct
/// CODESMRITI_LLM_API_KEY=...        (optional, sent as Bearer)
/// ```
pub struct HttpChatClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    url: String,
}

impl HttpChatClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let base: String = base_url.into();
        let url = format!("{}{}", base.trim_end_matches('/'), COMPLETIONS_PATH);
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key,
            model: model.into(),
            url,
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("CODESMRITI_LLM_URL")
            .unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string());
        let model =
            std::env::var("CODESMRITI_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let api_key = std::env::var("CODESMRITI_LLM_API_KEY").ok();
        Self::new(base, model, api_key)
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, DomainError> {
        let request = ApiRequest {
            model: &self.model,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: system,
                },
                ApiMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature: TEMPERATURE,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::llm(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("LLM endpoint returned {}: {}", status, body);
            return Err(DomainError::llm(format!("Endpoint returned {}", status)));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| DomainError::llm(format!("Failed to parse response: {}", e)))?;

        Ok(api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}
