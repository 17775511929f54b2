//! Ollama `/api/generate` client.

use super::{LlmClient, LlmError};
use crate::models::{ModelLoadError, ProviderParams};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;

pub(crate) const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Non-streaming Ollama completion client.
pub struct OllamaLlm {
    http: Client,
    base_url: String,
    model: String,
    options: Map<String, Value>,
}

impl OllamaLlm {
    /// Build a client from native Ollama parameters (`model`, `base_url`, `temperature`,
    /// `num_predict`, `top_p`, `timeout_secs`).
    pub fn from_params(name: &str, params: &ProviderParams) -> Result<Self, ModelLoadError> {
        let model = params
            .str("model")
            .ok_or_else(|| ModelLoadError::missing(name, "ollama", "model"))?
            .to_string();
        let base_url = params.str("base_url").unwrap_or(DEFAULT_OLLAMA_URL).to_string();
        let timeout = params.u64("timeout_secs").unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut options = Map::new();
        if let Some(temperature) = params.f64("temperature") {
            options.insert("temperature".into(), json!(temperature));
        }
        if let Some(limit) = params.u64("num_predict") {
            options.insert("num_predict".into(), json!(limit));
        }
        if let Some(top_p) = params.f64("top_p") {
            options.insert("top_p".into(), json!(top_p));
        }

        let http = Client::builder()
            .user_agent("docsage/llm")
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|source| ModelLoadError::Client {
                name: name.to_string(),
                source,
            })?;
        Ok(Self {
            http,
            base_url,
            model,
            options,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl LlmClient for OllamaLlm {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": self.options,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LlmError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404 (is model '{}' pulled?)",
                self.endpoint(),
                self.model
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            LlmError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(LlmError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}
