//! Two-set document comparison with holistic and chunkwise strategies.

use super::chain::{PromptChain, StructuredChain};
use super::prepare::DocumentPreparer;
use super::types::{
    ChunkComparison, ComparisonResult, DocumentComparison, PipelineError, StepInvocationError,
};
use super::{COMPARISON_SECTION, step_enabled};
use crate::config::Settings;
use crate::document::Chunk;
use crate::llm::LlmClient;
use crate::prompts::{PromptCatalog, PromptTemplate};
use std::path::Path;
use std::sync::Arc;

const HOLISTIC_STEP: &str = "holistic_compare";
const PAIR_STEP: &str = "compare_docs";
const REDUCE_STEP: &str = "chunk_reduce";

/// Comparison strategy selected by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonStrategy {
    /// One call over both concatenated sides.
    Holistic,
    /// One call per positional chunk pair, then a reduce call.
    Chunkwise,
}

impl ComparisonStrategy {
    /// Resolve a strategy by step name (`holistic_compare`, `compare_docs`) or short name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "holistic_compare" | "holistic" => Some(Self::Holistic),
            "compare_docs" | "chunkwise" => Some(Self::Chunkwise),
            _ => None,
        }
    }

    /// Step whose toggle gates the strategy.
    pub fn step(self) -> &'static str {
        match self {
            Self::Holistic => HOLISTIC_STEP,
            Self::Chunkwise => PAIR_STEP,
        }
    }
}

/// Compares document set A against document set B.
pub struct ComparisonPipeline {
    preparer: DocumentPreparer,
    settings: Arc<Settings>,
    prompts: Arc<PromptCatalog>,
    llm: Arc<dyn LlmClient>,
}

impl ComparisonPipeline {
    /// Assemble the pipeline from settings and a prompt snapshot.
    pub fn new(
        settings: Arc<Settings>,
        prompts: Arc<PromptCatalog>,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            preparer: DocumentPreparer::for_pipeline(&settings, COMPARISON_SECTION)?,
            settings,
            prompts,
            llm,
        })
    }

    /// Resolve `requested` (or the configured default) to an enabled strategy.
    pub fn resolve_strategy(&self, requested: Option<&str>) -> Result<ComparisonStrategy, PipelineError> {
        let name = requested.unwrap_or(self.settings.document_comparison.default_strategy.as_str());
        let strategy = ComparisonStrategy::from_name(name)
            .ok_or_else(|| PipelineError::InvalidStrategy(name.to_string()))?;
        if !step_enabled(&self.settings, COMPARISON_SECTION, strategy.step(), true) {
            tracing::error!(strategy = name, "Comparison strategy is disabled");
            return Err(PipelineError::InvalidStrategy(name.to_string()));
        }
        Ok(strategy)
    }

    /// Compare the documents at `paths_a` with those at `paths_b`.
    pub async fn run<P: AsRef<Path>>(
        &self,
        paths_a: &[P],
        paths_b: &[P],
        strategy: Option<&str>,
    ) -> Result<ComparisonResult, PipelineError> {
        if paths_a.is_empty() {
            return Err(PipelineError::MissingInput { side: 'A' });
        }
        if paths_b.is_empty() {
            return Err(PipelineError::MissingInput { side: 'B' });
        }
        let strategy = self.resolve_strategy(strategy)?;

        let chunks_a = self.preparer.split(&self.preparer.load(paths_a)?);
        let chunks_b = self.preparer.split(&self.preparer.load(paths_b)?);
        tracing::info!(
            ?strategy,
            chunks_a = chunks_a.len(),
            chunks_b = chunks_b.len(),
            "Comparing document sets"
        );
        self.compare_chunks(strategy, &chunks_a, &chunks_b).await
    }

    /// Compare two prepared chunk sets.
    pub async fn compare_chunks(
        &self,
        strategy: ComparisonStrategy,
        chunks_a: &[Chunk],
        chunks_b: &[Chunk],
    ) -> Result<ComparisonResult, PipelineError> {
        match strategy {
            ComparisonStrategy::Holistic => self.holistic(chunks_a, chunks_b).await,
            ComparisonStrategy::Chunkwise => self.chunkwise(chunks_a, chunks_b).await,
        }
    }

    async fn holistic(
        &self,
        chunks_a: &[Chunk],
        chunks_b: &[Chunk],
    ) -> Result<ComparisonResult, PipelineError> {
        let text_a = concatenate(chunks_a);
        let text_b = concatenate(chunks_b);
        if text_a.trim().is_empty() {
            return Err(PipelineError::EmptyText { side: 'A' });
        }
        if text_b.trim().is_empty() {
            return Err(PipelineError::EmptyText { side: 'B' });
        }

        let chain = self.structured(HOLISTIC_STEP)?;
        let result = invoke_pair(&chain, &text_a, &text_b).await.map_err(|error| {
            tracing::error!(%error, "Holistic comparison failed");
            PipelineError::from(error)
        })?;
        Ok(ComparisonResult::Holistic { result })
    }

    async fn chunkwise(
        &self,
        chunks_a: &[Chunk],
        chunks_b: &[Chunk],
    ) -> Result<ComparisonResult, PipelineError> {
        let pair_chain = self.structured(PAIR_STEP)?;
        let pairs = chunks_a.len().max(chunks_b.len());
        let mut comparisons = Vec::with_capacity(pairs);
        let mut last_error = None;

        for index in 0..pairs {
            let text_a = chunks_a.get(index).map(|chunk| chunk.content.as_str()).unwrap_or("");
            let text_b = chunks_b.get(index).map(|chunk| chunk.content.as_str()).unwrap_or("");
            if text_a.trim().is_empty() && text_b.trim().is_empty() {
                tracing::debug!(chunk_index = index, "Skipping empty chunk pair");
                continue;
            }
            match invoke_pair(&pair_chain, text_a, text_b).await {
                Ok(comparison) => comparisons.push(ChunkComparison {
                    chunk_index: index,
                    comparison,
                }),
                Err(error) => {
                    tracing::warn!(chunk_index = index, %error, "Chunk pair comparison failed; omitting pair");
                    last_error = Some(error);
                }
            }
        }

        if comparisons.is_empty() {
            return Err(match last_error {
                Some(error) => error.into(),
                None => PipelineError::EmptyText {
                    side: if chunks_a.is_empty() { 'A' } else { 'B' },
                },
            });
        }

        let summary = self.reduce(&comparisons).await;
        Ok(ComparisonResult::Chunkwise {
            comparisons,
            summary,
        })
    }

    /// Reduce pair results into one comparison; falls back to their union.
    async fn reduce(&self, comparisons: &[ChunkComparison]) -> DocumentComparison {
        let merged = || DocumentComparison::merged(comparisons.iter().map(|pair| &pair.comparison));
        let Some(template) = self.template(REDUCE_STEP) else {
            return merged();
        };
        let chain: StructuredChain<DocumentComparison> =
            StructuredChain::new(PromptChain::new(REDUCE_STEP, template, self.llm.clone()));
        let combined = comparisons
            .iter()
            .map(|pair| {
                let body = serde_json::to_string_pretty(&pair.comparison).unwrap_or_default();
                format!("Chunk {}:\n{body}", pair.chunk_index)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        match chain.invoke_single(&combined).await {
            Ok(summary) => summary,
            Err(error) => {
                tracing::warn!(%error, "Chunk reduce failed; merging pair results");
                merged()
            }
        }
    }

    fn template(&self, step: &'static str) -> Option<PromptTemplate> {
        if !step_enabled(&self.settings, COMPARISON_SECTION, step, true) {
            return None;
        }
        self.prompts.get(COMPARISON_SECTION, step).cloned()
    }

    fn structured(
        &self,
        step: &'static str,
    ) -> Result<StructuredChain<DocumentComparison>, PipelineError> {
        let template = self
            .prompts
            .get(COMPARISON_SECTION, step)
            .cloned()
            .ok_or(PipelineError::MissingStep {
                section: COMPARISON_SECTION,
                step,
            })?;
        Ok(StructuredChain::new(PromptChain::new(
            step,
            template,
            self.llm.clone(),
        )))
    }
}

fn concatenate(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Bind side A and side B to the template's first two declared variables.
async fn invoke_pair(
    chain: &StructuredChain<DocumentComparison>,
    text_a: &str,
    text_b: &str,
) -> Result<DocumentComparison, StepInvocationError> {
    let variables = chain.chain().variables();
    let first = variables.first().map(String::as_str).unwrap_or("document_a");
    let second = variables.get(1).map(String::as_str).unwrap_or("document_b");
    chain.invoke(&[(first, text_a), (second, text_b)]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{settings, settings_with};
    use crate::document::Document;
    use crate::pipeline::test_support::{ScriptedLlm, unavailable};

    fn catalog() -> Arc<PromptCatalog> {
        let mut catalog = PromptCatalog::default();
        catalog.insert(
            COMPARISON_SECTION,
            HOLISTIC_STEP,
            PromptTemplate::new("HOLISTIC A=<{document_a}> B=<{document_b}>", &["document_a", "document_b"]),
        );
        catalog.insert(
            COMPARISON_SECTION,
            PAIR_STEP,
            PromptTemplate::new("PAIR A=<{document_a}> B=<{document_b}>", &["document_a", "document_b"]),
        );
        catalog.insert(
            COMPARISON_SECTION,
            REDUCE_STEP,
            PromptTemplate::new("REDUCE {comparisons}", &["comparisons"]),
        );
        Arc::new(catalog)
    }

    fn chunks(prefix: &str, count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|index| {
                let mut chunk = Document::new(format!("{prefix}{index}"), format!("/{prefix}.txt"));
                chunk.metadata.chunk_id = Some(index);
                chunk
            })
            .collect()
    }

    fn comparing_llm() -> Arc<ScriptedLlm> {
        ScriptedLlm::replying(|prompt| {
            if prompt.starts_with("REDUCE") {
                Ok(r#"{"similarities": ["overall"]}"#.into())
            } else {
                Ok(r#"{"differences": ["pair"]}"#.into())
            }
        })
    }

    #[tokio::test]
    async fn chunkwise_pairs_by_position_up_to_longer_side() {
        let llm = comparing_llm();
        let pipeline = ComparisonPipeline::new(Arc::new(settings()), catalog(), llm.clone()).unwrap();

        let result = pipeline
            .compare_chunks(ComparisonStrategy::Chunkwise, &chunks("a", 3), &chunks("b", 5))
            .await
            .unwrap();

        let pair_prompts = llm.prompts_containing("PAIR ");
        assert_eq!(pair_prompts.len(), 5);
        assert!(pair_prompts[0].starts_with("PAIR A=<a0> B=<b0>"));
        assert!(pair_prompts[3].starts_with("PAIR A=<> B=<b3>"));
        assert!(pair_prompts[4].starts_with("PAIR A=<> B=<b4>"));
        assert_eq!(llm.prompts_containing("REDUCE ").len(), 1);

        match result {
            ComparisonResult::Chunkwise {
                comparisons,
                summary,
            } => {
                let indices: Vec<usize> = comparisons.iter().map(|pair| pair.chunk_index).collect();
                assert_eq!(indices, vec![0, 1, 2, 3, 4]);
                assert_eq!(summary.similarities, vec!["overall"]);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_pairs_are_omitted_and_reduce_falls_back_to_union() {
        let llm = ScriptedLlm::replying(|prompt| {
            if prompt.starts_with("PAIR A=<a1>") {
                Err(unavailable())
            } else if prompt.starts_with("REDUCE") {
                Err(unavailable())
            } else if prompt.starts_with("PAIR A=<a0>") {
                Ok(r#"{"similarities": ["s0"], "unique_to_a": ["x"]}"#.into())
            } else {
                Ok(r#"{"similarities": ["s0", "s2"]}"#.into())
            }
        });
        let pipeline = ComparisonPipeline::new(Arc::new(settings()), catalog(), llm).unwrap();

        let result = pipeline
            .compare_chunks(ComparisonStrategy::Chunkwise, &chunks("a", 3), &chunks("b", 3))
            .await
            .unwrap();

        let ComparisonResult::Chunkwise {
            comparisons,
            summary,
        } = result
        else {
            panic!("expected chunkwise result");
        };
        assert_eq!(comparisons.len(), 2);
        assert_eq!(summary.similarities, vec!["s0", "s2"]);
        assert_eq!(summary.unique_to_a, vec!["x"]);
    }

    #[tokio::test]
    async fn every_pair_failing_surfaces_the_step_error() {
        let llm = ScriptedLlm::replying(|_| Err(unavailable()));
        let pipeline = ComparisonPipeline::new(Arc::new(settings()), catalog(), llm).unwrap();
        let error = pipeline
            .compare_chunks(ComparisonStrategy::Chunkwise, &chunks("a", 2), &chunks("b", 2))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Step(_)));
    }

    #[tokio::test]
    async fn holistic_sends_both_sides_in_one_call() {
        let llm = ScriptedLlm::replying(|_| Ok(r#"{"unique_to_b": ["only b"]}"#.into()));
        let pipeline = ComparisonPipeline::new(Arc::new(settings()), catalog(), llm.clone()).unwrap();

        let result = pipeline
            .compare_chunks(ComparisonStrategy::Holistic, &chunks("a", 2), &chunks("b", 1))
            .await
            .unwrap();

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("HOLISTIC A=<a0\na1> B=<b0>"));
        assert_eq!(
            result,
            ComparisonResult::Holistic {
                result: DocumentComparison {
                    unique_to_b: vec!["only b".into()],
                    ..DocumentComparison::default()
                }
            }
        );
    }

    #[tokio::test]
    async fn holistic_with_empty_side_fails_before_any_model_call() {
        let dir = tempfile::tempdir().unwrap();
        let side_a = dir.path().join("a.txt");
        let side_b = dir.path().join("b.txt");
        std::fs::write(&side_a, "1234 5678 ### @@@").unwrap();
        std::fs::write(&side_b, "Quarterly revenue grew.").unwrap();
        let settings = settings_with(
            "[preprocessing]\nremove_numeric = true\nremove_special_chars = true\n",
        );
        let llm = comparing_llm();
        let pipeline = ComparisonPipeline::new(Arc::new(settings), catalog(), llm.clone()).unwrap();

        let error = pipeline
            .run(&[side_a], &[side_b], Some("holistic_compare"))
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::EmptyText { side: 'A' }));
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn missing_side_is_rejected() {
        let pipeline =
            ComparisonPipeline::new(Arc::new(settings()), catalog(), comparing_llm()).unwrap();
        let empty: [&str; 0] = [];
        let error = pipeline.run(&["/x.txt"], &empty, None).await.unwrap_err();
        assert!(matches!(error, PipelineError::MissingInput { side: 'B' }));
    }

    #[test]
    fn strategy_resolution_checks_names_and_toggles() {
        let pipeline =
            ComparisonPipeline::new(Arc::new(settings()), catalog(), comparing_llm()).unwrap();
        assert_eq!(pipeline.resolve_strategy(None).unwrap(), ComparisonStrategy::Chunkwise);
        assert_eq!(
            pipeline.resolve_strategy(Some("holistic")).unwrap(),
            ComparisonStrategy::Holistic
        );
        assert!(matches!(
            pipeline.resolve_strategy(Some("sideways")),
            Err(PipelineError::InvalidStrategy(_))
        ));

        let disabled = settings_with(
            "[document_comparison.steps]\nholistic_compare = false\ncompare_docs = true\n",
        );
        let pipeline =
            ComparisonPipeline::new(Arc::new(disabled), catalog(), comparing_llm()).unwrap();
        assert!(matches!(
            pipeline.resolve_strategy(Some("holistic_compare")),
            Err(PipelineError::InvalidStrategy(_))
        ));
    }
}
