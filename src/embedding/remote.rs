//! HTTP embedding backends: Ollama `/api/embed` and OpenAI-compatible `/embeddings`.

use super::{EmbeddingClient, EmbeddingClientError};
use crate::models::{ModelLoadError, ProviderParams};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn build_http(name: &str, params: &ProviderParams) -> Result<Client, ModelLoadError> {
    let timeout = params.u64("timeout_secs").unwrap_or(DEFAULT_TIMEOUT_SECS);
    Client::builder()
        .user_agent("docsage/embedding")
        .timeout(Duration::from_secs(timeout))
        .build()
        .map_err(|source| ModelLoadError::Client {
            name: name.to_string(),
            source,
        })
}

fn check_count(expected: usize, vectors: &[Vec<f32>]) -> Result<(), EmbeddingClientError> {
    if vectors.len() != expected {
        return Err(EmbeddingClientError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    Ok(())
}

async fn read_failure(response: reqwest::Response, provider: &str) -> EmbeddingClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    EmbeddingClientError::GenerationFailed(format!("{provider} returned {status}: {body}"))
}

/// Ollama embedding client.
pub struct OllamaEmbedding {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedding {
    /// Build from native parameters (`model`, `base_url`, `timeout_secs`).
    pub fn from_params(name: &str, params: &ProviderParams) -> Result<Self, ModelLoadError> {
        let model = params
            .str("model")
            .ok_or_else(|| ModelLoadError::missing(name, "ollama", "model"))?
            .to_string();
        Ok(Self {
            http: build_http(name, params)?,
            base_url: params.str("base_url").unwrap_or(DEFAULT_OLLAMA_URL).to_string(),
            model,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;
        if !response.status().is_success() {
            return Err(read_failure(response, "Ollama").await);
        }
        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!("malformed Ollama response: {error}"))
        })?;
        check_count(expected, &body.embeddings)?;
        Ok(body.embeddings)
    }
}

/// OpenAI-compatible embedding client.
pub struct OpenAiEmbedding {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: Option<u64>,
}

impl OpenAiEmbedding {
    /// Build from native parameters (`model`, `api_key`, `base_url`, `dimensions`,
    /// `timeout_secs`).
    pub fn from_params(name: &str, params: &ProviderParams) -> Result<Self, ModelLoadError> {
        let model = params
            .str("model")
            .ok_or_else(|| ModelLoadError::missing(name, "openai", "model"))?
            .to_string();
        let api_key = params
            .str("api_key")
            .ok_or_else(|| ModelLoadError::missing(name, "openai", "api_key"))?
            .to_string();
        Ok(Self {
            http: build_http(name, params)?,
            base_url: params.str("base_url").unwrap_or(DEFAULT_OPENAI_URL).to_string(),
            api_key,
            model,
            dimensions: params.u64("dimensions"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let mut payload = json!({ "model": self.model, "input": texts });
        if let (Some(dimensions), Some(body)) = (self.dimensions, payload.as_object_mut()) {
            body.insert("dimensions".into(), json!(dimensions));
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;
        if !response.status().is_success() {
            return Err(read_failure(response, "embeddings endpoint").await);
        }
        let mut body: OpenAiEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!("malformed embeddings response: {error}"))
        })?;
        body.data.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|item| item.embedding).collect();
        check_count(expected, &vectors)?;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn ollama_embed_returns_vectors_in_order() {
        let server = MockServer::start_async().await;
        let params = ProviderParams::from_pairs([
            ("model", toml::Value::String("nomic-embed-text".into())),
            ("base_url", toml::Value::String(server.base_url())),
        ]);
        let client = OllamaEmbedding::from_params("embed", &params).unwrap();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body(json!({"model": "nomic-embed-text", "input": ["a", "b"]}));
                then.status(200)
                    .json_body(json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]}));
            })
            .await;

        let vectors = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn openai_embed_reorders_by_index_and_checks_count() {
        let server = MockServer::start_async().await;
        let params = ProviderParams::from_pairs([
            ("model", toml::Value::String("text-embedding-3-small".into())),
            ("api_key", toml::Value::String("sk-test".into())),
            ("base_url", toml::Value::String(server.base_url())),
        ]);
        let client = OpenAiEmbedding::from_params("embed", &params).unwrap();
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(json!({
                    "data": [
                        {"index": 1, "embedding": [0.0, 1.0]},
                        {"index": 0, "embedding": [1.0, 0.0]}
                    ]
                }));
            })
            .await;

        let vectors = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);

        let error = client
            .generate_embeddings(vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            EmbeddingClientError::CountMismatch { expected: 3, actual: 2 }
        ));
    }

    #[tokio::test]
    async fn empty_input_skips_the_network() {
        let params = ProviderParams::from_pairs([
            ("model", toml::Value::String("nomic-embed-text".into())),
            ("base_url", toml::Value::String("http://127.0.0.1:9".into())),
        ]);
        let client = OllamaEmbedding::from_params("embed", &params).unwrap();
        assert!(client.generate_embeddings(Vec::new()).await.unwrap().is_empty());
    }
}
