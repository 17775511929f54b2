//! Chunk retrieval over an in-memory vector index.

mod index;

pub use index::VectorIndex;

use crate::config::RetrievalConfig;
use crate::document::Chunk;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;
use index::cosine_similarity;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Ranking mode used by [`VectorRetriever`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Plain cosine top-k.
    Similarity,
    /// Maximal marginal relevance over a wider candidate pool.
    Mmr,
    /// Cosine top-k restricted to scores above a threshold.
    SimilarityScoreThreshold,
}

/// Errors raised while indexing or searching.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// No non-empty chunks were supplied to the index.
    #[error("cannot build a vector index without chunks")]
    EmptyIndex,
    /// The embedding backend failed.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// The query embedding was missing from the backend response.
    #[error("embedding backend returned no vector for the query")]
    MissingQueryVector,
}

/// Search parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetrieverOptions {
    /// Ranking mode.
    pub search_type: SearchType,
    /// Maximum results.
    pub top_k: usize,
    /// MMR candidate pool size.
    pub fetch_k: usize,
    /// MMR relevance weight in `[0, 1]`.
    pub lambda_mult: f32,
    /// Minimum score for threshold search.
    pub score_threshold: f32,
}

impl From<&RetrievalConfig> for RetrieverOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            search_type: config.search_type,
            top_k: config.top_k,
            fetch_k: config.fetch_k.max(config.top_k),
            lambda_mult: config.lambda_mult,
            score_threshold: config.score_threshold,
        }
    }
}

/// A retrieved chunk with its cosine score against the query.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    /// Retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity with the query.
    pub score: f32,
}

/// Capability returning the chunks most relevant to a query.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Chunks ordered by descending relevance, at most `top_k`.
    async fn search(&self, query: &str) -> Result<Vec<Chunk>, RetrievalError>;
}

/// Retriever over a [`VectorIndex`].
pub struct VectorRetriever {
    index: VectorIndex,
    embedding: Arc<dyn EmbeddingClient>,
    options: RetrieverOptions,
}

impl VectorRetriever {
    /// Wrap an index with the embedding client used to build it.
    pub fn new(
        index: VectorIndex,
        embedding: Arc<dyn EmbeddingClient>,
        options: RetrieverOptions,
    ) -> Self {
        Self {
            index,
            embedding,
            options,
        }
    }

    /// Search parameters in effect.
    pub fn options(&self) -> RetrieverOptions {
        self.options
    }

    /// Indexed chunk count.
    pub fn indexed_chunks(&self) -> usize {
        self.index.len()
    }

    /// Ranked search returning scores alongside chunks.
    pub async fn search_with_scores(&self, query: &str) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let query_vector = self
            .embedding
            .generate_embeddings(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(RetrievalError::MissingQueryVector)?;

        let mut ranked: Vec<(usize, f32)> = self
            .index
            .entries()
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(&query_vector, &entry.vector)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let top_k = self.options.top_k;
        let selected = match self.options.search_type {
            SearchType::Similarity => ranked.into_iter().take(top_k).collect(),
            SearchType::SimilarityScoreThreshold => ranked
                .into_iter()
                .filter(|(_, score)| *score >= self.options.score_threshold)
                .take(top_k)
                .collect(),
            SearchType::Mmr => self.maximal_marginal_relevance(ranked),
        };

        tracing::debug!(
            search_type = ?self.options.search_type,
            results = selected.len(),
            "Retrieved chunks"
        );
        let entries = self.index.entries();
        Ok(selected
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: entries[position].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Greedy MMR over the `fetch_k` best candidates.
    fn maximal_marginal_relevance(&self, ranked: Vec<(usize, f32)>) -> Vec<(usize, f32)> {
        let entries = self.index.entries();
        let lambda = self.options.lambda_mult;
        let mut candidates: Vec<(usize, f32)> =
            ranked.into_iter().take(self.options.fetch_k).collect();
        let mut selected: Vec<(usize, f32)> = Vec::new();

        while selected.len() < self.options.top_k && !candidates.is_empty() {
            let mut best = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (slot, (position, relevance)) in candidates.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|(chosen, _)| {
                        cosine_similarity(&entries[*position].vector, &entries[*chosen].vector)
                    })
                    .fold(0.0_f32, f32::max);
                let score = lambda * relevance - (1.0 - lambda) * redundancy;
                if score > best_score {
                    best_score = score;
                    best = slot;
                }
            }
            selected.push(candidates.remove(best));
        }
        selected
    }
}

#[async_trait]
impl DocumentRetriever for VectorRetriever {
    async fn search(&self, query: &str) -> Result<Vec<Chunk>, RetrievalError> {
        Ok(self
            .search_with_scores(query)
            .await?
            .into_iter()
            .map(|scored| scored.chunk)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::embedding::HashingEmbedding;

    fn options(search_type: SearchType, top_k: usize) -> RetrieverOptions {
        RetrieverOptions {
            search_type,
            top_k,
            fetch_k: 10,
            lambda_mult: 0.5,
            score_threshold: 0.5,
        }
    }

    async fn retriever(search_type: SearchType, top_k: usize) -> VectorRetriever {
        let embedding: Arc<dyn EmbeddingClient> = Arc::new(HashingEmbedding::new(256));
        let chunks = vec![
            Document::new("solar panels convert sunlight into electricity", "/energy.txt"),
            Document::new("solar panels convert sunlight into power", "/energy2.txt"),
            Document::new("the recipe needs flour sugar and eggs", "/baking.txt"),
            Document::new("wind turbines generate electricity from wind", "/wind.txt"),
        ];
        let index = VectorIndex::build(chunks, embedding.as_ref(), 2).await.unwrap();
        VectorRetriever::new(index, embedding, options(search_type, top_k))
    }

    #[tokio::test]
    async fn similarity_orders_by_descending_score() {
        let retriever = retriever(SearchType::Similarity, 2).await;
        let results = retriever
            .search_with_scores("solar panels convert sunlight into electricity")
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.metadata.source, "/energy.txt");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn threshold_drops_weak_matches() {
        let retriever = retriever(SearchType::SimilarityScoreThreshold, 4).await;
        let results = retriever
            .search_with_scores("solar panels convert sunlight into electricity")
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|scored| scored.score >= 0.5));
        assert!(results.iter().all(|scored| scored.chunk.metadata.source != "/baking.txt"));
    }

    #[tokio::test]
    async fn mmr_returns_top_k_distinct_chunks() {
        let retriever = retriever(SearchType::Mmr, 3).await;
        let results = retriever.search("solar electricity").await.unwrap();
        assert_eq!(results.len(), 3);
        let mut sources: Vec<&str> =
            results.iter().map(|chunk| chunk.metadata.source.as_str()).collect();
        sources.sort();
        sources.dedup();
        assert_eq!(sources.len(), 3);
    }
}
