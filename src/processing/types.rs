//! Error definitions for the processing stage.

use anyhow::Error as TokenizerError;
use thiserror::Error;

/// Errors produced while building splitters or chunking documents.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A strategy configured an impossible chunk budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured encoding.
    #[error("failed to initialize tokenizer '{encoding}': {source}")]
    Tokenizer {
        /// Encoding or model name we attempted to load.
        encoding: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
    /// The requested strategy is not declared in `[splitting_configs]`.
    #[error("unknown splitting strategy '{0}'")]
    UnknownStrategy(String),
    /// The strategy has no `kind` and its name does not identify a splitter family.
    #[error("splitting strategy '{0}' does not declare a splitter kind")]
    MissingKind(String),
}
