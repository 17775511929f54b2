//! Embedding backends.

mod remote;

pub use remote::{OllamaEmbedding, OpenAiEmbedding};

use crate::models::{ModelLoadError, ProviderParams};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider returned a different number of vectors than inputs.
    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch {
        /// Number of inputs sent.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Deterministic feature-hashing embeddings computed in process.
///
/// Lowercased word tokens are hashed with SHA-256 into a signed bucket; the resulting vector is
/// L2-normalized. Texts sharing vocabulary land close together, which is enough for offline use
/// and tests.
#[derive(Clone, Debug)]
pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    /// Create a client producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Build from native parameters (`dimension`).
    pub fn from_params(name: &str, params: &ProviderParams) -> Result<Self, ModelLoadError> {
        let dimension = params
            .u64("dimension")
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_HASHING_DIMENSION);
        if dimension == 0 {
            return Err(ModelLoadError::InvalidParameter {
                model: name.to_string(),
                parameter: "dimension",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Self::new(dimension))
    }

    /// Vector width.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty());
        for token in tokens {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[index] += sign;
        }

        let norm = embedding.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbedding {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tracing::trace!(count = texts.len(), dimension = self.dimension, "Hashing embeddings");
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}
