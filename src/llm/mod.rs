//! Chat/completion model clients.
//!
//! Every backend exposes the same single-prompt interface: a rendered prompt in, the model's
//! text out. Construction lives in [`crate::models::ModelFactory`], which maps generic settings
//! parameters onto each backend's native names.

mod ollama;
mod openai;

pub use ollama::OllamaLlm;
pub use openai::OpenAiLlm;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced while invoking a model.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider could not be reached or the endpoint does not exist.
    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("LLM generation failed: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed LLM response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by chat/completion backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Send one prompt and return the generated text.
    async fn invoke(&self, prompt: &str) -> Result<String, LlmError>;
}
