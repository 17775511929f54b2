//! Model factory: turns `[models]` declarations into live LLM and embedding clients.

mod adapters;

pub use adapters::ProviderParams;

use crate::config::{ConfigError, EmbeddingProvider, LlmProvider, Settings};
use crate::embedding::{EmbeddingClient, HashingEmbedding, OllamaEmbedding, OpenAiEmbedding};
use crate::llm::{LlmClient, OllamaLlm, OpenAiLlm};
use adapters::{
    HASHING_EMBEDDING, OLLAMA_EMBEDDING, OLLAMA_LLM, OPENAI_EMBEDDING, OPENAI_LLM, ProviderAdapter,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while constructing model clients.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    /// A parameter the backend cannot work without is absent.
    #[error("model '{model}' ({provider}) is missing required parameter '{parameter}'")]
    MissingParameter {
        /// Configured model name.
        model: String,
        /// Backend name.
        provider: &'static str,
        /// Native parameter name.
        parameter: &'static str,
    },
    /// A parameter is present but unusable.
    #[error("model '{model}' has invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Configured model name.
        model: String,
        /// Native parameter name.
        parameter: &'static str,
        /// Human readable explanation.
        reason: String,
    },
    /// The model name did not resolve against the settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The HTTP client for the backend could not be built.
    #[error("failed to build HTTP client for model '{name}': {source}")]
    Client {
        /// Configured model name.
        name: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

impl ModelLoadError {
    pub(crate) fn missing(model: &str, provider: &'static str, parameter: &'static str) -> Self {
        Self::MissingParameter {
            model: model.to_string(),
            provider,
            parameter,
        }
    }
}

/// Builds clients for named models declared in the settings.
#[derive(Clone)]
pub struct ModelFactory {
    settings: Arc<Settings>,
}

impl ModelFactory {
    /// Create a factory over the given settings.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Instantiate the named chat model, or `defaults.llm`.
    pub fn load_llm(&self, name: Option<&str>) -> Result<Arc<dyn LlmClient>, ModelLoadError> {
        let (name, entry) = self.settings.get_llm_config(name)?;
        let client: Arc<dyn LlmClient> = match entry.provider {
            LlmProvider::Ollama => {
                let params = OLLAMA_LLM.remap(name, &entry.params);
                Arc::new(OllamaLlm::from_params(name, &params)?)
            }
            LlmProvider::OpenAI => {
                let params = self.with_api_key(OPENAI_LLM, name, &entry.params);
                Arc::new(OpenAiLlm::from_params(name, &params)?)
            }
        };
        tracing::info!(model = name, backend = client.model(), "Loaded LLM");
        Ok(client)
    }

    /// Instantiate the named embedding model, or `defaults.embedding`.
    pub fn load_embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingClient>, ModelLoadError> {
        let (name, entry) = self.settings.get_embedding_config(name)?;
        let client: Arc<dyn EmbeddingClient> = match entry.provider {
            EmbeddingProvider::Ollama => {
                let params = OLLAMA_EMBEDDING.remap(name, &entry.params);
                Arc::new(OllamaEmbedding::from_params(name, &params)?)
            }
            EmbeddingProvider::OpenAI => {
                let params = self.with_api_key(OPENAI_EMBEDDING, name, &entry.params);
                Arc::new(OpenAiEmbedding::from_params(name, &params)?)
            }
            EmbeddingProvider::Hashing => {
                let params = HASHING_EMBEDDING.remap(name, &entry.params);
                Arc::new(HashingEmbedding::from_params(name, &params)?)
            }
        };
        tracing::info!(model = name, provider = ?entry.provider, "Loaded embedding model");
        Ok(client)
    }

    /// Remap parameters and fill `api_key` from `[api_keys]` when the model omits it.
    fn with_api_key(
        &self,
        adapter: ProviderAdapter,
        name: &str,
        params: &toml::Table,
    ) -> ProviderParams {
        let mut native = adapter.remap(name, params);
        let shared = self
            .settings
            .api_keys
            .get(adapter.provider)
            .filter(|key| !key.trim().is_empty() && !key.contains("${"));
        if let Some(key) = shared {
            native.insert_missing("api_key", toml::Value::String(key.clone()));
        }
        native
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{settings, settings_with};

    #[test]
    fn loads_default_models() {
        let factory = ModelFactory::new(Arc::new(settings()));
        let llm = factory.load_llm(None).expect("llm");
        assert_eq!(llm.model(), "llama3");
        factory.load_embedding(None).expect("embedding");
    }

    #[test]
    fn unknown_model_is_a_config_error() {
        let factory = ModelFactory::new(Arc::new(settings()));
        let error = factory.load_llm(Some("missing")).err().expect("unknown");
        assert!(matches!(
            error,
            ModelLoadError::Config(ConfigError::UnknownModel { kind: "llm", .. })
        ));
    }

    #[test]
    fn openai_key_falls_back_to_api_keys_table() {
        let factory = ModelFactory::new(Arc::new(settings_with(
            r#"
            [api_keys]
            openai = "sk-shared"

            [models.llms.remote]
            provider = "openai"
            params = { model = "gpt-4o-mini", max_output_tokens = 128 }
            "#,
        )));
        let llm = factory.load_llm(Some("remote")).expect("openai llm");
        assert_eq!(llm.model(), "gpt-4o-mini");
    }

    #[test]
    fn unresolved_shared_key_is_not_used() {
        let factory = ModelFactory::new(Arc::new(settings_with(
            r#"
            [models.llms.remote]
            provider = "openai"
            params = { model = "gpt-4o-mini" }
            "#,
        )));
        let error = factory.load_llm(Some("remote")).err().expect("no key");
        assert!(matches!(
            error,
            ModelLoadError::MissingParameter { parameter: "api_key", .. }
        ));
    }
}
