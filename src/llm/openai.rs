//! OpenAI-compatible `/chat/completions` client.

use super::{LlmClient, LlmError};
use crate::models::{ModelLoadError, ProviderParams};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub(crate) const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Single-turn chat completion client.
pub struct OpenAiLlm {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
    top_p: Option<f64>,
}

impl OpenAiLlm {
    /// Build a client from native OpenAI parameters (`model`, `api_key`, `base_url`,
    /// `temperature`, `max_tokens`, `top_p`, `timeout_secs`).
    pub fn from_params(name: &str, params: &ProviderParams) -> Result<Self, ModelLoadError> {
        let model = params
            .str("model")
            .ok_or_else(|| ModelLoadError::missing(name, "openai", "model"))?
            .to_string();
        let api_key = params
            .str("api_key")
            .ok_or_else(|| ModelLoadError::missing(name, "openai", "api_key"))?
            .to_string();
        let timeout = params.u64("timeout_secs").unwrap_or(DEFAULT_TIMEOUT_SECS);
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
            base_url: params.str("base_url").unwrap_or(DEFAULT_OPENAI_URL).to_string(),
            api_key,
            model,
            temperature: params.f64("temperature"),
            max_tokens: params.u64("max_tokens"),
            top_p: params.f64("top_p"),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiLlm {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        let mut payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Value::Object(body) = &mut payload {
            if let Some(temperature) = self.temperature {
                body.insert("temperature".into(), json!(temperature));
            }
            if let Some(max_tokens) = self.max_tokens {
                body.insert("max_tokens".into(), json!(max_tokens));
            }
            if let Some(top_p) = self.top_p {
                body.insert("top_p".into(), json!(top_p));
            }
        }

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ProviderUnavailable(format!(
                "{} returned {status}: {body}",
                self.endpoint()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::GenerationFailed(format!(
                "chat completion returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            LlmError::InvalidResponse(format!("failed to decode chat completion: {error}"))
        })?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| LlmError::InvalidResponse("chat completion had no content".into()))
    }
}
