//! Service facade shared by the HTTP surface and the CLI.
//!
//! [`DocumentService`] owns the long-lived handles: settings, prompt registry, model clients,
//! metrics, the session store, and one [`QaChatPipeline`] per live chat session. Each chat
//! pipeline sits behind its own async mutex, so queries against the same session run one at a
//! time while different sessions proceed independently.

use crate::config::Settings;
use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;
use crate::logging::pipeline_span;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::models::{ModelFactory, ModelLoadError};
use crate::pipeline::{
    ANALYSIS_SECTION, AnalysisPipeline, AnalysisResult, COMPARISON_SECTION, ComparisonPipeline,
    ComparisonResult, PipelineError, QA_CHAT_SECTION, QaChatPipeline, QaResponse,
};
use crate::prompts::{PromptError, PromptRegistry};
use crate::session::{
    ConversationEntry, LocalSessionStore, MemorySessionStore, SessionBackend, SessionError,
    SessionRecord, SessionStore,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{Instrument, Span};

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A pipeline run failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Session storage failed or the session is unknown or ended.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Prompt catalog could not be reloaded.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// A configured model could not be instantiated.
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    /// A result could not be encoded for the session record.
    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Input for an analysis run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AnalysisRequest {
    /// Files or directories to analyze.
    pub paths: Vec<PathBuf>,
    /// Existing analysis session to store the result on; a new one is created when absent.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Input for a comparison run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ComparisonRequest {
    /// Files or directories forming document set A.
    pub paths_a: Vec<PathBuf>,
    /// Files or directories forming document set B.
    pub paths_b: Vec<PathBuf>,
    /// `holistic_compare` or `compare_docs`; the configured default when absent.
    #[serde(default)]
    pub strategy: Option<String>,
    /// Existing comparison session to store the result on.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Analysis result plus the session it was stored on.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AnalysisOutcome {
    /// Session holding the result.
    pub session_id: String,
    /// Pipeline output.
    pub result: AnalysisResult,
}

/// Comparison result plus the session it was stored on.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ComparisonOutcome {
    /// Session holding the result.
    pub session_id: String,
    /// Pipeline output.
    pub result: ComparisonResult,
}

/// State of a chat session after creation or ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatSession {
    /// Session id to use for queries.
    pub session_id: String,
    /// Chunks indexed by the last ingestion (0 when none happened).
    pub documents_indexed: usize,
}

/// Operations exposed to external surfaces (HTTP, CLI).
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Summarize documents and store the result on a session.
    async fn run_analysis(&self, request: AnalysisRequest)
    -> Result<AnalysisOutcome, ServiceError>;

    /// Compare two document sets and store the result on a session.
    async fn run_comparison(
        &self,
        request: ComparisonRequest,
    ) -> Result<ComparisonOutcome, ServiceError>;

    /// Open a chat session, indexing `paths` (or the default chat directory when empty).
    async fn start_chat(&self, paths: Vec<PathBuf>) -> Result<ChatSession, ServiceError>;

    /// Replace the documents a chat session answers from.
    async fn ingest_chat_documents(
        &self,
        session_id: &str,
        paths: Vec<PathBuf>,
    ) -> Result<ChatSession, ServiceError>;

    /// Ask a question within a chat session.
    async fn query(&self, session_id: &str, question: &str) -> Result<QaResponse, ServiceError>;

    /// End a chat session and release its retriever.
    async fn end_chat(&self, session_id: &str) -> Result<SessionRecord, ServiceError>;

    /// Re-read the prompt catalog; returns the template count.
    async fn reload_prompts(&self) -> Result<usize, ServiceError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Drop sessions idle longer than the configured timeout; returns their ids.
    async fn evict_idle_sessions(&self) -> Result<Vec<String>, ServiceError>;
}

type ChatHandle = Arc<Mutex<QaChatPipeline>>;

/// Default [`PipelineApi`] implementation.
pub struct DocumentService {
    settings: Arc<Settings>,
    prompts: Arc<PromptRegistry>,
    llm: Arc<dyn LlmClient>,
    embedding: Arc<dyn EmbeddingClient>,
    metrics: Arc<PipelineMetrics>,
    sessions: Arc<dyn SessionStore>,
    chats: RwLock<HashMap<String, ChatHandle>>,
    pending_uploads: Mutex<HashMap<String, Vec<String>>>,
}

impl DocumentService {
    /// Build the service from settings, loading the default models and the configured store.
    pub fn new(
        settings: Arc<Settings>,
        prompts: Arc<PromptRegistry>,
    ) -> Result<Self, ServiceError> {
        let factory = ModelFactory::new(settings.clone());
        let llm = factory.load_llm(None)?;
        let embedding = factory.load_embedding(None)?;
        let sessions = session_store(&settings);
        Ok(Self::with_clients(settings, prompts, llm, embedding, sessions))
    }

    /// Build the service around explicit model clients and session store.
    pub fn with_clients(
        settings: Arc<Settings>,
        prompts: Arc<PromptRegistry>,
        llm: Arc<dyn LlmClient>,
        embedding: Arc<dyn EmbeddingClient>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            settings,
            prompts,
            llm,
            embedding,
            metrics: Arc::new(PipelineMetrics::new()),
            sessions,
            chats: RwLock::new(HashMap::new()),
            pending_uploads: Mutex::new(HashMap::new()),
        }
    }

    /// Session store backing this service.
    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.sessions.clone()
    }

    async fn store_result(
        &self,
        route: &str,
        session_id: Option<&str>,
        result: serde_json::Value,
    ) -> Result<String, ServiceError> {
        let mut record = match session_id {
            Some(id) => self.sessions.load(route, id).await?,
            None => self.sessions.create(route).await?,
        };
        record.results.push(result);
        record.touch();
        self.sessions.save(&record).await?;
        Ok(record.session_id)
    }

    fn new_chat_pipeline(&self) -> Result<QaChatPipeline, PipelineError> {
        QaChatPipeline::new(
            self.settings.clone(),
            &self.prompts.snapshot(),
            self.llm.clone(),
            self.embedding.clone(),
        )
    }

    /// Live pipeline for a session, rebuilt without documents when the process lost it.
    async fn chat_pipeline(&self, session_id: &str) -> Result<ChatHandle, ServiceError> {
        if let Some(handle) = self.chats.read().await.get(session_id) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(Mutex::new(self.new_chat_pipeline()?));
        let mut chats = self.chats.write().await;
        Ok(chats
            .entry(session_id.to_string())
            .or_insert(handle)
            .clone())
    }

    async fn active_chat(&self, session_id: &str) -> Result<SessionRecord, ServiceError> {
        let record = self.sessions.load(QA_CHAT_SECTION, session_id).await?;
        if record.ended {
            return Err(SessionError::Ended {
                session_id: session_id.to_string(),
            }
            .into());
        }
        Ok(record)
    }

    async fn ingest_default_directory(&self, pipeline: &mut QaChatPipeline) -> usize {
        let directory = &self.settings.paths.document_qa_chat_dir;
        if !directory.is_dir() {
            tracing::info!(dir = %directory.display(), "No default chat documents; starting empty");
            return 0;
        }
        match pipeline.ingest_new_documents(&[directory]).await {
            Ok(indexed) => indexed,
            Err(error) => {
                tracing::warn!(%error, dir = %directory.display(), "Default chat documents not indexed");
                0
            }
        }
    }

    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, ServiceError> {
        let prompts = self.prompts.snapshot();
        let pipeline = AnalysisPipeline::new(&self.settings, &prompts, self.llm.clone())?;
        let result = match pipeline.run(&request.paths).await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(%error, paths = request.paths.len(), "Analysis failed");
                return Err(error.into());
            }
        };
        self.metrics.record_analysis(result.fallback_chunks as u64);
        let session_id = self
            .store_result(
                ANALYSIS_SECTION,
                request.session_id.as_deref(),
                serde_json::to_value(&result)?,
            )
            .await?;
        Span::current().record("session_id", session_id.as_str());
        tracing::info!("Analysis stored");
        Ok(AnalysisOutcome { session_id, result })
    }

    async fn compare(
        &self,
        request: ComparisonRequest,
    ) -> Result<ComparisonOutcome, ServiceError> {
        let pipeline = ComparisonPipeline::new(
            self.settings.clone(),
            self.prompts.snapshot(),
            self.llm.clone(),
        )?;
        let result = match pipeline
            .run(&request.paths_a, &request.paths_b, request.strategy.as_deref())
            .await
        {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(%error, strategy = ?request.strategy, "Comparison failed");
                return Err(error.into());
            }
        };
        self.metrics.record_comparison();
        let session_id = self
            .store_result(
                COMPARISON_SECTION,
                request.session_id.as_deref(),
                serde_json::to_value(&result)?,
            )
            .await?;
        Span::current().record("session_id", session_id.as_str());
        tracing::info!("Comparison stored");
        Ok(ComparisonOutcome { session_id, result })
    }

    async fn open_chat(&self, paths: Vec<PathBuf>) -> Result<ChatSession, ServiceError> {
        let mut pipeline = self.new_chat_pipeline()?;
        let documents_indexed = if paths.is_empty() {
            self.ingest_default_directory(&mut pipeline).await
        } else {
            pipeline.ingest_new_documents(&paths).await?
        };
        self.metrics.record_ingest(documents_indexed as u64);

        let record = self.sessions.create(QA_CHAT_SECTION).await?;
        let session_id = record.session_id;
        if !paths.is_empty() {
            self.remember_uploads(&session_id, &paths).await;
        }
        self.chats
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(pipeline)));
        Span::current().record("session_id", session_id.as_str());
        tracing::info!(documents_indexed, "Chat session started");
        Ok(ChatSession {
            session_id,
            documents_indexed,
        })
    }

    async fn replace_chat_documents(
        &self,
        session_id: &str,
        paths: Vec<PathBuf>,
    ) -> Result<ChatSession, ServiceError> {
        self.active_chat(session_id).await?;
        let handle = self.chat_pipeline(session_id).await?;
        let mut pipeline = handle.lock().await;
        let mut record = self.active_chat(session_id).await?;
        let documents_indexed = pipeline.ingest_new_documents(&paths).await?;
        self.metrics.record_ingest(documents_indexed as u64);
        self.remember_uploads(session_id, &paths).await;
        record.touch();
        self.sessions.save(&record).await?;
        drop(pipeline);
        tracing::info!(documents_indexed, "Chat documents replaced");
        Ok(ChatSession {
            session_id: session_id.to_string(),
            documents_indexed,
        })
    }

    async fn ask(&self, session_id: &str, question: &str) -> Result<QaResponse, ServiceError> {
        self.active_chat(session_id).await?;
        let handle = self.chat_pipeline(session_id).await?;
        // History is read under the session lock so queued turns see their predecessors.
        let pipeline = handle.lock().await;
        let record = self.active_chat(session_id).await?;
        let response = pipeline.query(question, &record.history_text()).await;
        self.metrics.record_query(response.success);
        if !response.success {
            tracing::warn!(error = ?response.error, "Chat query failed");
            return Ok(response);
        }

        let mut entry = ConversationEntry::new(question, response.answer.clone());
        if let Some(files) = self.pending_uploads.lock().await.remove(session_id) {
            entry = entry.with_uploads(files);
        }
        self.sessions
            .append_turn(QA_CHAT_SECTION, session_id, entry)
            .await?;
        drop(pipeline);
        Ok(response)
    }

    async fn remember_uploads(&self, session_id: &str, paths: &[PathBuf]) {
        let names = paths
            .iter()
            .map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            })
            .collect::<Vec<_>>();
        self.pending_uploads
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .extend(names);
    }
}

/// Store selected by `[sessions].backend`.
pub fn session_store(settings: &Settings) -> Arc<dyn SessionStore> {
    match settings.sessions.backend {
        SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
        SessionBackend::Local => Arc::new(LocalSessionStore::new(&settings.paths.sessions_dir)),
    }
}

#[async_trait]
impl PipelineApi for DocumentService {
    async fn run_analysis(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisOutcome, ServiceError> {
        let span = pipeline_span(ANALYSIS_SECTION, request.session_id.as_deref());
        self.analyze(request).instrument(span).await
    }

    async fn run_comparison(
        &self,
        request: ComparisonRequest,
    ) -> Result<ComparisonOutcome, ServiceError> {
        let span = pipeline_span(COMPARISON_SECTION, request.session_id.as_deref());
        self.compare(request).instrument(span).await
    }

    async fn start_chat(&self, paths: Vec<PathBuf>) -> Result<ChatSession, ServiceError> {
        let span = pipeline_span(QA_CHAT_SECTION, None);
        self.open_chat(paths).instrument(span).await
    }

    async fn ingest_chat_documents(
        &self,
        session_id: &str,
        paths: Vec<PathBuf>,
    ) -> Result<ChatSession, ServiceError> {
        let span = pipeline_span(QA_CHAT_SECTION, Some(session_id));
        self.replace_chat_documents(session_id, paths)
            .instrument(span)
            .await
    }

    async fn query(&self, session_id: &str, question: &str) -> Result<QaResponse, ServiceError> {
        let span = pipeline_span(QA_CHAT_SECTION, Some(session_id));
        self.ask(session_id, question).instrument(span).await
    }

    async fn end_chat(&self, session_id: &str) -> Result<SessionRecord, ServiceError> {
        let record = self.sessions.end(QA_CHAT_SECTION, session_id).await?;
        self.chats.write().await.remove(session_id);
        self.pending_uploads.lock().await.remove(session_id);
        Ok(record)
    }

    async fn reload_prompts(&self) -> Result<usize, ServiceError> {
        Ok(self.prompts.reload()?)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn evict_idle_sessions(&self) -> Result<Vec<String>, ServiceError> {
        let idle = Duration::from_secs(self.settings.sessions.idle_timeout_secs);
        let evicted = self.sessions.evict_idle(idle).await?;
        if !evicted.is_empty() {
            let mut chats = self.chats.write().await;
            let mut pending = self.pending_uploads.lock().await;
            for session_id in &evicted {
                chats.remove(session_id);
                pending.remove(session_id);
            }
            tracing::info!(evicted = evicted.len(), "Idle sessions evicted");
        }
        Ok(evicted)
    }
}
