use super::RetrievalError;
use crate::document::Chunk;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Embedded chunk held by an index.
#[derive(Clone, Debug)]
pub(crate) struct IndexedChunk {
    pub(crate) chunk: Chunk,
    pub(crate) vector: Vec<f32>,
}

/// Brute-force in-memory vector index over chunk embeddings.
///
/// An index is never updated in place; new material means building a new index.
#[derive(Clone, Debug)]
pub struct VectorIndex {
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Embed `chunks` in batches of `batch_size` and index them.
    ///
    /// Chunks whose text is identical to an earlier chunk are indexed once.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedding: &dyn EmbeddingClient,
        batch_size: usize,
    ) -> Result<Self, RetrievalError> {
        let mut seen = HashSet::new();
        let unique: Vec<Chunk> = chunks
            .into_iter()
            .filter(|chunk| !chunk.content.trim().is_empty())
            .filter(|chunk| seen.insert(content_hash(&chunk.content)))
            .collect();
        if unique.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }

        let mut entries = Vec::with_capacity(unique.len());
        for batch in unique.chunks(batch_size.max(1)) {
            let texts = batch.iter().map(|chunk| chunk.content.clone()).collect();
            let vectors = embedding.generate_embeddings(texts).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingClientError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                }
                .into());
            }
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexedChunk { chunk, vector }),
            );
        }

        tracing::info!(chunks = entries.len(), "Built vector index");
        Ok(Self { entries })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[IndexedChunk] {
        &self.entries
    }
}

fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
