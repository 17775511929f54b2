//! Chunking engine: named splitter strategies turned into bounded, numbered chunks.
//!
//! Highlights:
//!
//! - Strategies come from `[splitting_configs]`; a pipeline picks one through
//!   `[pipeline_chunking_map]`, falling back to `default_strategy`.
//! - Character-measured families (recursive, character, markdown) cap `chunk_size` at
//!   1024 characters and drop empty separators from configured lists; an unsplittable span is
//!   still cut on character boundaries so no chunk exceeds its budget.
//! - The token family uses `semchunk-rs` with a `tiktoken-rs` counter. Base chunks are cut to
//!   `chunk_size - chunk_overlap` tokens and each one is prefixed with the last `chunk_overlap`
//!   tokens of its predecessor, so every chunk after the first carries the full overlap.
//!   Unknown encodings fall back to `cl100k_base`.
//! - `chunk_id` numbers chunks contiguously across the whole input set, in input order.

use crate::config::{Settings, SplitterConfig};
use crate::document::{Chunk, Document};
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use super::splitters::{
    DEFAULT_SEPARATORS, MARKDOWN_SEPARATORS, split_on_separator, split_recursive,
};
use super::types::ChunkingError;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const MAX_CHARACTER_CHUNK_SIZE: usize = 1024;
const DEFAULT_ENCODING: &str = "cl100k_base";

/// Splitter families selectable per strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterKind {
    /// Separator-priority recursive splitting measured in characters.
    #[serde(alias = "recursive")]
    RecursiveCharacter,
    /// Single separator splitting measured in characters.
    Character,
    /// Semantic splitting measured in tokens.
    Token,
    /// Markdown-structure aware recursive splitting.
    Markdown,
}

impl SplitterKind {
    /// Infer the family from a strategy name such as `"recursive_character"`.
    pub fn from_strategy_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "recursive_character" | "recursive" => Some(Self::RecursiveCharacter),
            "character" => Some(Self::Character),
            "token" => Some(Self::Token),
            "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// A configured splitter.
pub enum TextSplitter {
    /// Recursive character splitting.
    Recursive {
        /// Character budget per chunk.
        chunk_size: usize,
        /// Characters carried between chunks.
        chunk_overlap: usize,
        /// Separator priority list.
        separators: Vec<String>,
    },
    /// Single separator splitting.
    Character {
        /// Character budget per chunk.
        chunk_size: usize,
        /// Characters carried between chunks.
        chunk_overlap: usize,
        /// Split point.
        separator: String,
    },
    /// Token-budgeted semantic splitting.
    Token {
        /// Token budget per chunk.
        chunk_size: usize,
        /// Tokens carried between chunks.
        chunk_overlap: usize,
        /// Token counting function.
        counter: TokenCounter,
    },
}

impl fmt::Debug for TextSplitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recursive {
                chunk_size,
                chunk_overlap,
                separators,
            } => f
                .debug_struct("Recursive")
                .field("chunk_size", chunk_size)
                .field("chunk_overlap", chunk_overlap)
                .field("separators", separators)
                .finish(),
            Self::Character {
                chunk_size,
                chunk_overlap,
                separator,
            } => f
                .debug_struct("Character")
                .field("chunk_size", chunk_size)
                .field("chunk_overlap", chunk_overlap)
                .field("separator", separator)
                .finish(),
            Self::Token {
                chunk_size,
                chunk_overlap,
                ..
            } => f
                .debug_struct("Token")
                .field("chunk_size", chunk_size)
                .field("chunk_overlap", chunk_overlap)
                .finish_non_exhaustive(),
        }
    }
}

impl TextSplitter {
    /// Build a splitter from a strategy entry.
    pub fn from_config(strategy: &str, config: &SplitterConfig) -> Result<Self, ChunkingError> {
        let kind = config
            .kind
            .or_else(|| SplitterKind::from_strategy_name(strategy))
            .ok_or_else(|| ChunkingError::MissingKind(strategy.to_string()))?;
        if config.chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }

        let chunk_size = match kind {
            SplitterKind::Token => config.chunk_size,
            _ if config.chunk_size > MAX_CHARACTER_CHUNK_SIZE => {
                tracing::warn!(
                    strategy,
                    configured = config.chunk_size,
                    capped = MAX_CHARACTER_CHUNK_SIZE,
                    "Capping character chunk size"
                );
                MAX_CHARACTER_CHUNK_SIZE
            }
            _ => config.chunk_size,
        };
        let chunk_overlap = config.chunk_overlap.min(chunk_size.saturating_sub(1));

        let splitter = match kind {
            SplitterKind::RecursiveCharacter => Self::Recursive {
                chunk_size,
                chunk_overlap,
                separators: sanitize_separators(config.separators.as_deref(), &DEFAULT_SEPARATORS),
            },
            SplitterKind::Markdown => Self::Recursive {
                chunk_size,
                chunk_overlap,
                separators: sanitize_separators(
                    config.separators.as_deref(),
                    &MARKDOWN_SEPARATORS,
                ),
            },
            SplitterKind::Character => Self::Character {
                chunk_size,
                chunk_overlap,
                separator: config
                    .separator
                    .clone()
                    .filter(|separator| !separator.is_empty())
                    .unwrap_or_else(|| "\n\n".to_string()),
            },
            SplitterKind::Token => Self::Token {
                chunk_size,
                chunk_overlap,
                counter: build_token_counter(config.encoding.as_deref().unwrap_or(DEFAULT_ENCODING))?,
            },
        };
        Ok(splitter)
    }

    /// Split a single text. Whitespace-only input yields no chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self {
            Self::Recursive {
                chunk_size,
                chunk_overlap,
                separators,
            } => split_recursive(text, separators, *chunk_size, *chunk_overlap),
            Self::Character {
                chunk_size,
                chunk_overlap,
                separator,
            } => split_on_separator(text, separator, *chunk_size, *chunk_overlap),
            Self::Token {
                chunk_size,
                chunk_overlap,
                counter,
            } => chunk_text_with_counter(text, *chunk_size, *chunk_overlap, counter.clone()),
        }
    }
}

/// Configured separators minus empty strings, or the family defaults when none are configured.
///
/// The empty separator is re-appended for defaults only; configured lists rely on the
/// character-boundary fallback instead.
fn sanitize_separators(configured: Option<&[String]>, defaults: &[&str]) -> Vec<String> {
    match configured {
        Some(list) => {
            let cleaned: Vec<String> = list.iter().filter(|s| !s.is_empty()).cloned().collect();
            if cleaned.len() != list.len() {
                tracing::debug!("Dropped empty separator from configured list");
            }
            cleaned
        }
        None => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

/// Splits documents with one named strategy.
#[derive(Debug)]
pub struct ChunkingEngine {
    strategy: String,
    splitter: TextSplitter,
}

impl ChunkingEngine {
    /// Build an engine for `strategy` (or the default strategy).
    pub fn from_settings(settings: &Settings, strategy: Option<&str>) -> Result<Self, ChunkingError> {
        let (name, config) = settings.get_splitter_config(strategy).map_err(|_| {
            ChunkingError::UnknownStrategy(
                strategy
                    .unwrap_or(settings.splitting_configs.default_strategy.as_str())
                    .to_string(),
            )
        })?;
        let splitter = TextSplitter::from_config(&name, &config)?;
        tracing::info!(strategy = %name, splitter = ?splitter, "Chunking engine initialized");
        Ok(Self {
            strategy: name,
            splitter,
        })
    }

    /// Build the engine mapped to a pipeline section name.
    pub fn for_pipeline(settings: &Settings, pipeline: &str) -> Result<Self, ChunkingError> {
        let strategy = settings.get_pipeline_chunking_strategy(pipeline).to_string();
        Self::from_settings(settings, Some(&strategy))
    }

    /// Wrap an already configured splitter.
    pub fn new(strategy: impl Into<String>, splitter: TextSplitter) -> Self {
        Self {
            strategy: strategy.into(),
            splitter,
        }
    }

    /// Strategy name stamped onto produced chunks.
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Split every document and number the chunks `0..n` across the whole set.
    pub fn chunk(&self, documents: &[Document]) -> Vec<Chunk> {
        if documents.is_empty() {
            tracing::info!(strategy = %self.strategy, "No documents to chunk");
            return Vec::new();
        }
        let mut chunks = Vec::new();
        for document in documents {
            for piece in self.splitter.split_text(&document.content) {
                let mut chunk = document.with_content(piece);
                chunk.metadata.chunk_id = Some(chunks.len());
                chunk.metadata.chunk_strategy = Some(self.strategy.clone());
                chunks.push(chunk);
            }
        }
        tracing::info!(
            strategy = %self.strategy,
            documents = documents.len(),
            chunks = chunks.len(),
            "Chunking complete"
        );
        chunks
    }
}

/// Chunk `documents` with the named strategy (or the default when `None`).
pub fn chunk_documents(
    settings: &Settings,
    documents: &[Document],
    strategy: Option<&str>,
) -> Result<Vec<Chunk>, ChunkingError> {
    Ok(ChunkingEngine::from_settings(settings, strategy)?.chunk(documents))
}

fn build_token_counter(encoding: &str) -> Result<TokenCounter, ChunkingError> {
    let target = match encoding.trim() {
        "" => DEFAULT_ENCODING,
        trimmed => trimmed,
    };
    let bpe = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        encoding: target.to_string(),
        source,
    })?;
    let bpe = Arc::new(bpe);
    Ok(Arc::new(move |segment: &str| bpe.encode_ordinary(segment).len()))
}

fn resolve_encoding(name: &str) -> Result<CoreBPE, TokenizerError> {
    let by_name = match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    };
    if let Some(encoding) = by_name {
        return encoding;
    }
    get_bpe_from_model(name).or_else(|error| {
        tracing::warn!(
            encoding = name,
            %error,
            "Unknown tokenizer; falling back to 'cl100k_base'"
        );
        cl100k_base()
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = counter.clone();
    let base_budget = chunk_size.saturating_sub(overlap).max(1);
    let chunker = Chunker::new(
        base_budget,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base = chunker.chunk(text);
    if overlap == 0 || base.len() < 2 {
        return base;
    }

    let mut overlapped = Vec::with_capacity(base.len());
    let mut previous: Option<&str> = None;
    for current in &base {
        let chunk = match previous {
            Some(previous) => {
                let tail = trim_front_to_budget(previous, overlap, &counter);
                let mut combined = String::with_capacity(tail.len() + current.len() + 1);
                combined.push_str(tail);
                if !tail.is_empty() && !tail.ends_with(char::is_whitespace)
                    && !current.starts_with(char::is_whitespace)
                {
                    combined.push(' ');
                }
                combined.push_str(current);
                // BPE counts are not additive across the join.
                trim_front_to_budget(&combined, chunk_size, &counter).to_string()
            }
            None => current.clone(),
        };
        overlapped.push(chunk);
        previous = Some(current);
    }
    overlapped
}

/// Longest suffix of `text` (left-trimmed) whose token count fits `budget`.
fn trim_front_to_budget<'a>(text: &'a str, budget: usize, counter: &TokenCounter) -> &'a str {
    if budget == 0 {
        return "";
    }
    let mut candidate = text.trim_start();
    while !candidate.is_empty() && counter.as_ref()(candidate) > budget {
        let mut chars = candidate.chars();
        chars.next();
        candidate = chars.as_str().trim_start();
    }
    candidate
}
