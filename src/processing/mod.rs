//! Document processing: text cleaning and chunking.

pub mod chunking;
pub mod preprocess;
mod splitters;
pub mod types;

pub use chunking::{ChunkingEngine, SplitterKind, TextSplitter, chunk_documents};
pub use preprocess::{PreprocessOptions, Preprocessor};
pub use types::ChunkingError;
