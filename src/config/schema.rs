//! Typed view of the settings tables.

use crate::ingest::LoaderKind;
use crate::processing::{PreprocessOptions, SplitterKind};
use crate::retrieval::SearchType;
use crate::session::SessionBackend;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Supported LLM backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Local Ollama runtime (`/api/generate`).
    Ollama,
    /// OpenAI-compatible chat completions API.
    #[serde(alias = "open_ai")]
    OpenAI,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime (`/api/embed`).
    Ollama,
    /// OpenAI-compatible embeddings API.
    #[serde(alias = "open_ai")]
    OpenAI,
    /// Deterministic feature-hashing embeddings computed in process.
    Hashing,
}

/// A named model declaration: `{ provider, params }`.
#[derive(Clone, Debug, Deserialize)]
pub struct ModelEntry<P> {
    /// Backend used to serve the model.
    pub provider: P,
    /// Provider parameters under generic or native names.
    #[serde(default)]
    pub params: toml::Table,
}

/// `[models]` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ModelsConfig {
    /// Named chat/completion models.
    #[serde(default)]
    pub llms: BTreeMap<String, ModelEntry<LlmProvider>>,
    /// Named embedding models.
    #[serde(default)]
    pub embeddings: BTreeMap<String, ModelEntry<EmbeddingProvider>>,
}

/// `[defaults]` section naming the models used when callers do not pick one.
#[derive(Clone, Debug, Deserialize)]
pub struct DefaultsConfig {
    /// Key into `models.llms`.
    pub llm: String,
    /// Key into `models.embeddings`.
    pub embedding: String,
}

/// `[paths]` section.
#[derive(Clone, Debug, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the log file.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    /// Root directory for persisted chat sessions.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    /// Default document directory for chat when no paths are given.
    #[serde(default = "default_qa_dir")]
    pub document_qa_chat_dir: PathBuf,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_qa_dir() -> PathBuf {
    PathBuf::from("data/document_qa_chat")
}

/// `[preprocessing]` section.
#[derive(Clone, Debug, Deserialize)]
pub struct PreprocessingConfig {
    /// Text cleaning toggles.
    #[serde(flatten)]
    pub options: PreprocessOptions,
    /// Extensions picked up when scanning directories.
    #[serde(default = "default_supported_exts")]
    pub supported_exts: Vec<String>,
    /// Extension to loader mapping.
    #[serde(default = "default_loader_map")]
    pub loader_map: BTreeMap<String, LoaderKind>,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            options: PreprocessOptions::default(),
            supported_exts: default_supported_exts(),
            loader_map: default_loader_map(),
        }
    }
}

fn default_supported_exts() -> Vec<String> {
    [".txt", ".md", ".csv", ".json", ".pdf", ".docx", ".pptx", ".xlsx", ".db", ".sqlite"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_loader_map() -> BTreeMap<String, LoaderKind> {
    BTreeMap::from([
        (".txt".to_string(), LoaderKind::Text),
        (".md".to_string(), LoaderKind::Markdown),
        (".csv".to_string(), LoaderKind::Csv),
        (".json".to_string(), LoaderKind::Json),
        (".pdf".to_string(), LoaderKind::Pdf),
        (".docx".to_string(), LoaderKind::Docx),
        (".pptx".to_string(), LoaderKind::Pptx),
        (".xlsx".to_string(), LoaderKind::Xlsx),
    ])
}

/// One named splitter strategy.
#[derive(Clone, Debug, Deserialize)]
pub struct SplitterConfig {
    /// Splitter family; defaults to the strategy name when that names a kind.
    #[serde(default)]
    pub kind: Option<SplitterKind>,
    /// Maximum chunk length (characters, or tokens for the token splitter).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap carried between adjacent chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Separator priority list for the recursive splitter.
    #[serde(default)]
    pub separators: Option<Vec<String>>,
    /// Single separator for the character splitter.
    #[serde(default)]
    pub separator: Option<String>,
    /// Tokenizer encoding or model name for the token splitter.
    #[serde(default)]
    pub encoding: Option<String>,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

/// `[splitting_configs]` section: a default strategy plus named strategy tables.
#[derive(Clone, Debug, Deserialize)]
pub struct SplittingConfigs {
    /// Strategy used when a pipeline has no mapping.
    #[serde(default = "default_strategy_name")]
    pub default_strategy: String,
    /// Named strategies.
    #[serde(flatten)]
    pub strategies: BTreeMap<String, SplitterConfig>,
}

impl Default for SplittingConfigs {
    fn default() -> Self {
        Self {
            default_strategy: default_strategy_name(),
            strategies: BTreeMap::new(),
        }
    }
}

fn default_strategy_name() -> String {
    "recursive_character".to_string()
}

/// `[retrieval]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Ranking mode.
    pub search_type: SearchType,
    /// Maximum number of chunks returned per query.
    pub top_k: usize,
    /// Candidate pool size for MMR.
    pub fetch_k: usize,
    /// Relevance/diversity balance for MMR (1.0 = pure relevance).
    pub lambda_mult: f32,
    /// Minimum cosine score for `similarity_score_threshold`.
    pub score_threshold: f32,
    /// Per-chunk character cap when assembling answer context.
    pub context_chars_per_doc: usize,
    /// Number of texts per embedding request while indexing.
    pub embedding_batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_type: SearchType::Similarity,
            top_k: 5,
            fetch_k: 20,
            lambda_mult: 0.5,
            score_threshold: 0.2,
            context_chars_per_doc: 1500,
            embedding_batch_size: 64,
        }
    }
}

/// `[document_analysis]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Chunks dispatched per map batch.
    pub batch_size: usize,
    /// Characters of raw chunk text used when a map call fails.
    pub chunk_fallback_length: usize,
    /// In-flight map calls within a batch.
    pub max_concurrency: usize,
    /// Step toggles.
    pub steps: BTreeMap<String, bool>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            chunk_fallback_length: 500,
            max_concurrency: 4,
            steps: BTreeMap::from([
                ("summary_map".to_string(), true),
                ("summary_reduce".to_string(), true),
                ("keywords".to_string(), false),
            ]),
        }
    }
}

/// `[document_comparison]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Strategy used when the caller does not pick one.
    pub default_strategy: String,
    /// Step toggles.
    pub steps: BTreeMap<String, bool>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            default_strategy: "compare_docs".to_string(),
            steps: BTreeMap::from([
                ("holistic_compare".to_string(), true),
                ("compare_docs".to_string(), true),
                ("chunk_reduce".to_string(), true),
            ]),
        }
    }
}

/// `[document_qa_chat]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QaChatConfig {
    /// Step toggles.
    pub steps: BTreeMap<String, bool>,
}

impl Default for QaChatConfig {
    fn default() -> Self {
        Self {
            steps: BTreeMap::from([
                ("rewrite_question".to_string(), true),
                ("answer_using_context".to_string(), true),
            ]),
        }
    }
}

/// `[sessions]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Storage backend for conversation records.
    pub backend: SessionBackend,
    /// Seconds of inactivity after which a session is evicted.
    pub idle_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Local,
            idle_timeout_secs: 3600,
        }
    }
}

/// `[server]` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Fixed HTTP port; when absent the server scans a port range.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Log file rotation cadence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// A single file that grows forever.
    #[default]
    Never,
    /// A new file per day, suffixed with the date.
    Daily,
    /// A new file per hour.
    Hourly,
}

/// `[logging]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Rotation applied to files under `paths.logs_dir`.
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            rotation: LogRotation::Never,
        }
    }
}
