use async_trait::async_trait;

use crate::domain::DomainError;

/// An interface for sending chat-style prompts to the summarization LLM and
/// receiving text responses.
///
/// Implementors encapsulate transport, serialization, and vendor-specific
/// API details; the summarizer stays decoupled from any particular backend.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a `system` context message followed by a `user` prompt and
    /// return the assistant's response text.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, DomainError>;
}
