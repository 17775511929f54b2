//! Map-reduce summarization over chunked documents.

use super::chain::{PromptChain, StructuredChain};
use super::prepare::DocumentPreparer;
use super::types::{AnalysisResult, KeywordList, PipelineError};
use super::{ANALYSIS_SECTION, optional_step, required_step, truncate_chars};
use crate::config::Settings;
use crate::document::{Chunk, Document};
use crate::llm::LlmClient;
use crate::prompts::PromptCatalog;
use futures_util::{StreamExt, stream};
use std::path::Path;
use std::sync::Arc;

/// Summarizes a document set: per-chunk map calls, one reduce call, optional keywords.
///
/// A failed map call degrades to the leading characters of the chunk; a failed reduce call
/// degrades to the joined map output. Only a missing map or reduce prompt is fatal.
pub struct AnalysisPipeline {
    preparer: DocumentPreparer,
    map: PromptChain,
    reduce: PromptChain,
    keywords: Option<StructuredChain<KeywordList>>,
    batch_size: usize,
    fallback_length: usize,
    max_concurrency: usize,
}

impl AnalysisPipeline {
    /// Assemble the pipeline from settings and a prompt snapshot.
    pub fn new(
        settings: &Settings,
        prompts: &PromptCatalog,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self, PipelineError> {
        let map = required_step(settings, prompts, ANALYSIS_SECTION, "summary_map")?;
        let reduce = required_step(settings, prompts, ANALYSIS_SECTION, "summary_reduce")?;
        let keywords = optional_step(settings, prompts, ANALYSIS_SECTION, "keywords", false)
            .map(|template| {
                StructuredChain::new(PromptChain::new("keywords", template, llm.clone()))
            });
        let config = &settings.document_analysis;
        Ok(Self {
            preparer: DocumentPreparer::for_pipeline(settings, ANALYSIS_SECTION)?,
            map: PromptChain::new("summary_map", map, llm.clone()),
            reduce: PromptChain::new("summary_reduce", reduce, llm),
            keywords,
            batch_size: config.batch_size.max(1),
            fallback_length: config.chunk_fallback_length,
            max_concurrency: config.max_concurrency.max(1),
        })
    }

    /// Analyze the documents found at `paths`.
    pub async fn run<P: AsRef<Path>>(&self, paths: &[P]) -> Result<AnalysisResult, PipelineError> {
        let documents = self.preparer.load(paths)?;
        self.run_documents(&documents).await
    }

    /// Analyze already loaded documents.
    pub async fn run_documents(
        &self,
        documents: &[Document],
    ) -> Result<AnalysisResult, PipelineError> {
        let mut chunks = self.preparer.split_non_empty(documents)?;
        chunks.sort_by_key(|chunk| chunk.metadata.chunk_id.unwrap_or(usize::MAX));

        let (summaries, fallback_chunks) = self.map_chunks(&chunks).await;
        let combined = summaries.join("\n\n");

        let summary = match self.reduce.invoke_single(&combined).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                tracing::warn!("Reduce step returned empty output; using combined chunk summaries");
                combined
            }
            Err(error) => {
                tracing::warn!(%error, "Reduce step failed; using combined chunk summaries");
                combined
            }
        };

        let keywords = match &self.keywords {
            Some(chain) => match chain.invoke_single(&summary).await {
                Ok(list) => Some(list.keywords),
                Err(error) => {
                    tracing::warn!(%error, "Keyword extraction failed; omitting keywords");
                    None
                }
            },
            None => None,
        };

        tracing::info!(
            chunks = chunks.len(),
            fallback_chunks,
            keywords = keywords.as_ref().map(Vec::len),
            "Analysis complete"
        );
        Ok(AnalysisResult {
            summary,
            keywords,
            chunk_count: chunks.len(),
            fallback_chunks,
        })
    }

    /// Summarize chunks batch by batch, preserving chunk order in the output.
    async fn map_chunks(&self, chunks: &[Chunk]) -> (Vec<String>, usize) {
        let mut summaries = Vec::with_capacity(chunks.len());
        let mut fallbacks = 0;
        for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            tracing::debug!(batch = batch_index, size = batch.len(), "Running map batch");
            let calls: Vec<_> = batch
                .iter()
                .map(|chunk| self.map.invoke_single(&chunk.content))
                .collect();
            let outcomes: Vec<_> = stream::iter(calls)
                .buffered(self.max_concurrency)
                .collect()
                .await;

            for (chunk, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(summary) if !summary.trim().is_empty() => summaries.push(summary),
                    other => {
                        if let Err(error) = other {
                            tracing::warn!(
                                chunk_id = ?chunk.metadata.chunk_id,
                                source = %chunk.metadata.source,
                                %error,
                                "Map step failed; using raw chunk text"
                            );
                        }
                        fallbacks += 1;
                        summaries.push(truncate_chars(&chunk.content, self.fallback_length));
                    }
                }
            }
        }
        (summaries, fallbacks)
    }
}
