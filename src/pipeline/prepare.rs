use super::types::PipelineError;
use crate::config::Settings;
use crate::document::{Chunk, Document};
use crate::ingest::DocumentIngestor;
use crate::processing::{ChunkingEngine, Preprocessor};
use std::path::Path;

/// Ingest, clean, and chunk stage shared by every pipeline.
pub(crate) struct DocumentPreparer {
    pipeline: &'static str,
    ingestor: DocumentIngestor,
    preprocessor: Preprocessor,
    chunker: ChunkingEngine,
}

impl DocumentPreparer {
    /// Stages configured for `pipeline`, using its mapped chunking strategy.
    pub(crate) fn for_pipeline(
        settings: &Settings,
        pipeline: &'static str,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            pipeline,
            ingestor: DocumentIngestor::new(&settings.preprocessing),
            preprocessor: Preprocessor::new(settings.preprocessing.options),
            chunker: ChunkingEngine::for_pipeline(settings, pipeline)?,
        })
    }

    /// Load documents, failing when nothing could be loaded.
    pub(crate) fn load<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<Document>, PipelineError> {
        let documents = self.ingestor.load_paths(paths);
        if documents.is_empty() {
            tracing::error!(pipeline = self.pipeline, paths = paths.len(), "No documents loaded");
            return Err(PipelineError::EmptyInput {
                pipeline: self.pipeline,
            });
        }
        tracing::info!(pipeline = self.pipeline, documents = documents.len(), "Documents loaded");
        Ok(documents)
    }

    /// Preprocess and chunk; may return an empty set.
    pub(crate) fn split(&self, documents: &[Document]) -> Vec<Chunk> {
        let cleaned = self.preprocessor.transform(documents);
        self.chunker.chunk(&cleaned)
    }

    /// Preprocess and chunk, failing when no chunks result.
    pub(crate) fn split_non_empty(&self, documents: &[Document]) -> Result<Vec<Chunk>, PipelineError> {
        let chunks = self.split(documents);
        if chunks.is_empty() {
            tracing::error!(pipeline = self.pipeline, "Chunking produced no chunks");
            return Err(PipelineError::EmptyChunks {
                pipeline: self.pipeline,
            });
        }
        Ok(chunks)
    }

    /// Load, preprocess, and chunk in one step.
    pub(crate) fn prepare<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<Chunk>, PipelineError> {
        let documents = self.load(paths)?;
        self.split_non_empty(&documents)
    }
}
