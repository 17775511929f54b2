//! Retrieval-augmented chat over a session's documents.

use super::chain::PromptChain;
use super::prepare::DocumentPreparer;
use super::types::{PipelineError, QaResponse};
use super::{QA_CHAT_SECTION, step_enabled, truncate_chars};
use crate::config::Settings;
use crate::document::Chunk;
use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;
use crate::prompts::{PromptCatalog, PromptTemplate};
use crate::retrieval::{DocumentRetriever, RetrieverOptions, VectorIndex, VectorRetriever};
use std::path::Path;
use std::sync::Arc;

const REWRITE_STEP: &str = "rewrite_question";
const ANSWER_STEP: &str = "answer_using_context";

const DEFAULT_REWRITE_PROMPT: &str = "Given the conversation below and a follow-up question, \
rewrite the follow-up question as a standalone question that can be understood without the \
conversation. Return only the rewritten question.\n\nConversation:\n{chat_history}\n\n\
Follow-up question: {question}\n\nStandalone question:";

const DEFAULT_ANSWER_PROMPT: &str = "Answer the question using only the context below. If the \
context does not contain the answer, say that you do not know instead of making one \
up.\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:";

const FAILURE_ANSWER: &str =
    "Sorry, I could not answer that question right now. Please try again.";
const NO_DOCUMENTS_ANSWER: &str =
    "No documents are loaded for this session yet. Upload documents before asking questions.";

/// Per-session chat pipeline owning the session's retriever.
///
/// The retriever is replaced wholesale whenever documents are ingested. Queries never raise:
/// failures are reported in the response with `success: false`.
pub struct QaChatPipeline {
    preparer: DocumentPreparer,
    settings: Arc<Settings>,
    embedding: Arc<dyn EmbeddingClient>,
    rewrite: Option<PromptChain>,
    answer: PromptChain,
    retriever: Option<Arc<dyn DocumentRetriever>>,
    context_chars: usize,
}

impl QaChatPipeline {
    /// Assemble a pipeline with no documents indexed.
    pub fn new(
        settings: Arc<Settings>,
        prompts: &PromptCatalog,
        llm: Arc<dyn LlmClient>,
        embedding: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, PipelineError> {
        if !step_enabled(&settings, QA_CHAT_SECTION, ANSWER_STEP, true) {
            return Err(PipelineError::MissingStep {
                section: QA_CHAT_SECTION,
                step: ANSWER_STEP,
            });
        }
        let rewrite = step_enabled(&settings, QA_CHAT_SECTION, REWRITE_STEP, true).then(|| {
            let template = template_or(prompts, REWRITE_STEP, DEFAULT_REWRITE_PROMPT, &[
                "chat_history",
                "question",
            ]);
            PromptChain::new(REWRITE_STEP, template, llm.clone())
        });
        let answer_template =
            template_or(prompts, ANSWER_STEP, DEFAULT_ANSWER_PROMPT, &["context", "question"]);
        Ok(Self {
            preparer: DocumentPreparer::for_pipeline(&settings, QA_CHAT_SECTION)?,
            context_chars: settings.retrieval.context_chars_per_doc,
            settings,
            embedding,
            rewrite,
            answer: PromptChain::new(ANSWER_STEP, answer_template, llm),
            retriever: None,
        })
    }

    /// Use an externally built retriever.
    pub fn with_retriever(mut self, retriever: Arc<dyn DocumentRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Whether documents have been indexed.
    pub fn has_retriever(&self) -> bool {
        self.retriever.is_some()
    }

    /// Ingest `paths` and replace the retriever with one over the new chunks.
    ///
    /// On any failure the current retriever stays in place. Returns the number of indexed chunks.
    pub async fn ingest_new_documents<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
    ) -> Result<usize, PipelineError> {
        let chunks = self.preparer.prepare(paths)?;
        let retrieval = &self.settings.retrieval;
        let index =
            VectorIndex::build(chunks, self.embedding.as_ref(), retrieval.embedding_batch_size)
                .await?;
        let indexed = index.len();
        let retriever = VectorRetriever::new(
            index,
            self.embedding.clone(),
            RetrieverOptions::from(retrieval),
        );
        let replaced = self.retriever.replace(Arc::new(retriever)).is_some();
        tracing::info!(indexed, replaced, "Chat retriever rebuilt");
        Ok(indexed)
    }

    /// Answer `question`, rewriting it against `chat_history` first when history is present.
    pub async fn query(&self, question: &str, chat_history: &str) -> QaResponse {
        let question = question.trim();
        if question.is_empty() {
            return failure(question, "Please provide a question.", "question is empty", 0);
        }
        let Some(retriever) = &self.retriever else {
            tracing::warn!("Query received before any documents were indexed");
            return failure(question, NO_DOCUMENTS_ANSWER, "no documents indexed", 0);
        };

        let standalone = self.standalone_question(question, chat_history).await;
        let search_question = standalone.as_deref().unwrap_or(question);

        let chunks = match retriever.search(search_question).await {
            Ok(chunks) => chunks,
            Err(error) => {
                tracing::error!(%error, "Retrieval failed");
                return QaResponse {
                    standalone_question: standalone,
                    ..failure(question, FAILURE_ANSWER, &error.to_string(), 0)
                };
            }
        };
        let context = self.format_context(&chunks);

        match self
            .answer
            .invoke(&[("context", &context), ("question", search_question)])
            .await
        {
            Ok(answer) => {
                tracing::info!(retrieved = chunks.len(), "Question answered");
                QaResponse {
                    answer,
                    question: question.to_string(),
                    standalone_question: standalone,
                    success: true,
                    retrieved_docs_count: chunks.len(),
                    error: None,
                }
            }
            Err(error) => {
                tracing::error!(%error, "Answer generation failed");
                QaResponse {
                    standalone_question: standalone,
                    ..failure(question, FAILURE_ANSWER, &error.to_string(), chunks.len())
                }
            }
        }
    }

    /// Rewritten question, or `None` when there is no history or the rewrite failed.
    async fn standalone_question(&self, question: &str, chat_history: &str) -> Option<String> {
        if chat_history.trim().is_empty() {
            return None;
        }
        let chain = self.rewrite.as_ref()?;
        match chain
            .invoke(&[("chat_history", chat_history), ("question", question)])
            .await
        {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                tracing::debug!(original = question, rewritten = %rewritten, "Question rewritten");
                Some(rewritten.trim().to_string())
            }
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(%error, "Question rewrite failed; using original question");
                None
            }
        }
    }

    fn format_context(&self, chunks: &[Chunk]) -> String {
        chunks
            .iter()
            .map(|chunk| {
                format!(
                    "[Source: {}]\n{}",
                    chunk.source_name(),
                    truncate_chars(&chunk.content, self.context_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn template_or(
    prompts: &PromptCatalog,
    step: &str,
    fallback: &str,
    variables: &[&str],
) -> PromptTemplate {
    prompts.get(QA_CHAT_SECTION, step).cloned().unwrap_or_else(|| {
        tracing::debug!(step, "Using built-in chat prompt");
        PromptTemplate::new(fallback, variables)
    })
}

fn failure(question: &str, answer: &str, error: &str, retrieved: usize) -> QaResponse {
    QaResponse {
        answer: answer.to_string(),
        question: question.to_string(),
        standalone_question: None,
        success: false,
        retrieved_docs_count: retrieved,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{settings, settings_with};
    use crate::document::Document;
    use crate::embedding::HashingEmbedding;
    use crate::pipeline::test_support::{ScriptedLlm, unavailable};
    use crate::retrieval::RetrievalError;
    use async_trait::async_trait;

    struct FixedRetriever(Vec<Chunk>);

    #[async_trait]
    impl DocumentRetriever for FixedRetriever {
        async fn search(&self, _query: &str) -> Result<Vec<Chunk>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenRetriever;

    #[async_trait]
    impl DocumentRetriever for BrokenRetriever {
        async fn search(&self, _query: &str) -> Result<Vec<Chunk>, RetrievalError> {
            Err(RetrievalError::MissingQueryVector)
        }
    }

    fn catalog() -> PromptCatalog {
        let mut catalog = PromptCatalog::default();
        catalog.insert(
            QA_CHAT_SECTION,
            REWRITE_STEP,
            PromptTemplate::new("REWRITE {chat_history} || {question}", &["chat_history", "question"]),
        );
        catalog.insert(
            QA_CHAT_SECTION,
            ANSWER_STEP,
            PromptTemplate::new("ANSWER <{context}> Q: {question}", &["context", "question"]),
        );
        catalog
    }

    fn embedding() -> Arc<dyn EmbeddingClient> {
        Arc::new(HashingEmbedding::new(128))
    }

    fn pipeline(llm: Arc<ScriptedLlm>) -> QaChatPipeline {
        QaChatPipeline::new(Arc::new(settings()), &catalog(), llm, embedding())
            .unwrap()
            .with_retriever(Arc::new(FixedRetriever(vec![Document::new(
                "The warranty lasts two years.",
                "/docs/warranty.txt",
            )])))
    }

    #[tokio::test]
    async fn empty_history_never_invokes_rewrite() {
        let llm = ScriptedLlm::replying(|_| Ok("Two years.".into()));
        let response = pipeline(llm.clone())
            .query("How long is the warranty?", "")
            .await;

        assert!(response.success);
        assert_eq!(response.answer, "Two years.");
        assert_eq!(response.retrieved_docs_count, 1);
        assert!(response.standalone_question.is_none());
        assert!(llm.prompts_containing("REWRITE").is_empty());
        let answers = llm.prompts_containing("ANSWER");
        assert_eq!(answers.len(), 1);
        assert!(answers[0].contains("[Source: warranty.txt]\nThe warranty lasts two years."));
    }

    #[tokio::test]
    async fn failed_rewrite_uses_original_question() {
        let llm = ScriptedLlm::replying(|prompt| {
            if prompt.starts_with("REWRITE") {
                Err(unavailable())
            } else {
                Ok("Two years.".into())
            }
        });
        let response = pipeline(llm.clone())
            .query("And how long is it?", "Human: Tell me about the warranty\nAssistant: Sure.")
            .await;

        assert!(response.success);
        assert!(response.standalone_question.is_none());
        assert_eq!(llm.prompts_containing("REWRITE").len(), 1);
        assert!(llm.prompts_containing("ANSWER")[0].ends_with("Q: And how long is it?"));
    }

    #[tokio::test]
    async fn rewritten_question_drives_the_answer() {
        let llm = ScriptedLlm::replying(|prompt| {
            if prompt.starts_with("REWRITE") {
                Ok("How long is the warranty?".into())
            } else {
                Ok("Two years.".into())
            }
        });
        let response = pipeline(llm.clone())
            .query("And how long is it?", "Human: warranty?\nAssistant: yes")
            .await;

        assert_eq!(
            response.standalone_question.as_deref(),
            Some("How long is the warranty?")
        );
        assert_eq!(response.question, "And how long is it?");
        assert!(llm.prompts_containing("ANSWER")[0].ends_with("Q: How long is the warranty?"));
    }

    #[tokio::test]
    async fn answer_failure_is_reported_not_raised() {
        let llm = ScriptedLlm::replying(|_| Err(unavailable()));
        let response = pipeline(llm).query("Anything?", "").await;
        assert!(!response.success);
        assert_eq!(response.answer, FAILURE_ANSWER);
        assert!(response.error.unwrap().contains("scripted outage"));
    }

    #[tokio::test]
    async fn retrieval_failure_is_reported_not_raised() {
        let llm = ScriptedLlm::replying(|_| Ok("unused".into()));
        let pipeline = QaChatPipeline::new(Arc::new(settings()), &catalog(), llm.clone(), embedding())
            .unwrap()
            .with_retriever(Arc::new(BrokenRetriever));
        let response = pipeline.query("Anything?", "").await;
        assert!(!response.success);
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn query_without_documents_fails_gracefully() {
        let llm = ScriptedLlm::replying(|_| Ok("unused".into()));
        let pipeline =
            QaChatPipeline::new(Arc::new(settings()), &catalog(), llm, embedding()).unwrap();
        assert!(!pipeline.has_retriever());
        let response = pipeline.query("Anything?", "").await;
        assert!(!response.success);
        assert_eq!(response.answer, NO_DOCUMENTS_ANSWER);
    }

    #[tokio::test]
    async fn ingest_replaces_the_retriever() {
        let dir = tempfile::tempdir().unwrap();
        let solar = dir.path().join("solar.txt");
        let baking = dir.path().join("baking.txt");
        std::fs::write(&solar, "Solar panels convert sunlight into electricity.").unwrap();
        std::fs::write(&baking, "Bread needs flour, water, salt and yeast.").unwrap();

        let llm = ScriptedLlm::replying(|_| Ok("ok".into()));
        let mut pipeline =
            QaChatPipeline::new(Arc::new(settings()), &catalog(), llm.clone(), embedding())
                .unwrap();

        assert_eq!(pipeline.ingest_new_documents(&[&solar]).await.unwrap(), 1);
        pipeline.query("What do solar panels do?", "").await;
        assert!(llm.prompts()[0].contains("[Source: solar.txt]"));

        pipeline.ingest_new_documents(&[&baking]).await.unwrap();
        pipeline.query("What do solar panels do?", "").await;
        let last = llm.prompts().pop().unwrap();
        assert!(last.contains("[Source: baking.txt]"));
        assert!(!last.contains("solar.txt"));
    }

    #[tokio::test]
    async fn failed_ingest_keeps_existing_retriever() {
        let llm = ScriptedLlm::replying(|_| Ok("Two years.".into()));
        let mut pipeline = pipeline(llm);
        let error = pipeline
            .ingest_new_documents(&["/no/such/file.txt"])
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::EmptyInput { .. }));
        assert!(pipeline.query("How long?", "").await.success);
    }

    #[tokio::test]
    async fn context_is_truncated_per_chunk() {
        let settings = settings_with("[retrieval]\ncontext_chars_per_doc = 12\n");
        let llm = ScriptedLlm::replying(|_| Ok("Two years.".into()));
        let pipeline = QaChatPipeline::new(Arc::new(settings), &catalog(), llm.clone(), embedding())
            .unwrap()
            .with_retriever(Arc::new(FixedRetriever(vec![Document::new(
                "The warranty lasts two years.",
                "/docs/warranty.txt",
            )])));
        pipeline.query("How long?", "").await;
        assert!(llm.prompts()[0].contains("[Source: warranty.txt]\nThe warranty>"));
    }

    #[test]
    fn built_in_prompts_cover_missing_catalog_entries() {
        let llm = ScriptedLlm::replying(|_| Ok("unused".into()));
        let pipeline = QaChatPipeline::new(
            Arc::new(settings()),
            &PromptCatalog::default(),
            llm,
            embedding(),
        );
        assert!(pipeline.is_ok());
    }
}
