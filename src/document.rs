//! Document and chunk model shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Metadata carried alongside document text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Absolute, normalized path of the originating file.
    pub source: String,
    /// Table name for documents extracted from SQLite databases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Row count for table documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    /// Character length after preprocessing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_length: Option<usize>,
    /// Whitespace word count after preprocessing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    /// Position of a chunk within the chunked set, starting at zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<usize>,
    /// Name of the splitter strategy that produced the chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_strategy: Option<String>,
    /// Loader-specific extras (page counts, sheet names, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A unit of text with provenance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Text content.
    pub content: String,
    /// Provenance and processing metadata.
    pub metadata: DocumentMetadata,
}

/// A document produced by splitting; `metadata.chunk_id` is always set.
pub type Chunk = Document;

impl Document {
    /// Create a document for `source` with no extra metadata.
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata {
                source: source.into(),
                ..DocumentMetadata::default()
            },
        }
    }

    /// Copy of this document's metadata paired with new content.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: self.metadata.clone(),
        }
    }

    /// Final path component of the source, used when labelling context blocks.
    pub fn source_name(&self) -> &str {
        Path::new(&self.metadata.source)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.metadata.source)
    }
}
