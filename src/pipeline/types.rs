//! Pipeline errors and result payloads.

use crate::llm::LlmError;
use crate::models::ModelLoadError;
use crate::processing::ChunkingError;
use crate::prompts::PromptError;
use crate::retrieval::RetrievalError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single prompt-chain invocation.
#[derive(Debug, Error)]
pub enum StepInvocationError {
    /// The template could not be rendered with the supplied variables.
    #[error("step '{step}' could not render its prompt: {source}")]
    Render {
        /// Step name.
        step: String,
        /// Template error.
        #[source]
        source: PromptError,
    },
    /// The model call failed.
    #[error("step '{step}' model call failed: {source}")]
    Llm {
        /// Step name.
        step: String,
        /// Model error.
        #[source]
        source: LlmError,
    },
    /// The model output did not match the expected JSON schema, even after a repair attempt.
    #[error("step '{step}' returned output that does not match its schema: {reason}")]
    Schema {
        /// Step name.
        step: String,
        /// Last parse error.
        reason: String,
    },
}

impl StepInvocationError {
    /// Step that failed.
    pub fn step(&self) -> &str {
        match self {
            Self::Render { step, .. } | Self::Llm { step, .. } | Self::Schema { step, .. } => step,
        }
    }
}

/// Errors surfaced by a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No documents could be loaded from the supplied paths.
    #[error("{pipeline}: no documents could be loaded from the provided paths")]
    EmptyInput {
        /// Pipeline section name.
        pipeline: &'static str,
    },
    /// Documents loaded but chunking produced nothing.
    #[error("{pipeline}: documents produced no chunks after preprocessing")]
    EmptyChunks {
        /// Pipeline section name.
        pipeline: &'static str,
    },
    /// One comparison side has no text after preprocessing.
    #[error("document set {side} is empty after preprocessing")]
    EmptyText {
        /// `A` or `B`.
        side: char,
    },
    /// One comparison side received no paths.
    #[error("document set {side} was not provided")]
    MissingInput {
        /// `A` or `B`.
        side: char,
    },
    /// The requested strategy is unknown or disabled.
    #[error("invalid comparison strategy '{0}'")]
    InvalidStrategy(String),
    /// A required prompt step is missing from the catalog or disabled.
    #[error("required step '{section}.{step}' is not configured")]
    MissingStep {
        /// Pipeline section name.
        section: &'static str,
        /// Step name.
        step: &'static str,
    },
    /// Model construction failed.
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    /// Splitter construction failed.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// Index construction failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// A step failed with no fallback available.
    #[error(transparent)]
    Step(#[from] StepInvocationError),
}

/// Output of the analysis pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Final summary.
    pub summary: String,
    /// Keywords extracted from the summary, when that step ran and succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    /// Chunks summarized.
    pub chunk_count: usize,
    /// Chunks whose map call failed and were replaced by raw text.
    pub fallback_chunks: usize,
}

/// Structured keyword list returned by the keyword step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KeywordList {
    /// Short keywords or key phrases, most important first.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Structured comparison of two texts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentComparison {
    /// Points both documents share.
    #[serde(default)]
    pub similarities: Vec<String>,
    /// Points where the documents disagree or diverge.
    #[serde(default)]
    pub differences: Vec<String>,
    /// Points found only in document A.
    #[serde(default)]
    pub unique_to_a: Vec<String>,
    /// Points found only in document B.
    #[serde(default)]
    pub unique_to_b: Vec<String>,
}

impl DocumentComparison {
    /// Union of several comparisons with duplicate entries removed, order preserved.
    pub fn merged<'a>(parts: impl IntoIterator<Item = &'a DocumentComparison>) -> Self {
        let mut merged = Self::default();
        for part in parts {
            extend_unique(&mut merged.similarities, &part.similarities);
            extend_unique(&mut merged.differences, &part.differences);
            extend_unique(&mut merged.unique_to_a, &part.unique_to_a);
            extend_unique(&mut merged.unique_to_b, &part.unique_to_b);
        }
        merged
    }
}

fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

/// Comparison of one positional chunk pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkComparison {
    /// Position of the pair.
    pub chunk_index: usize,
    /// Pair result.
    pub comparison: DocumentComparison,
}

/// Output of the comparison pipeline, tagged by the strategy that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ComparisonResult {
    /// Whole-document comparison.
    Holistic {
        /// Single comparison of both sides.
        result: DocumentComparison,
    },
    /// Pairwise chunk comparison followed by a reduce step.
    Chunkwise {
        /// Per-pair results in chunk order.
        comparisons: Vec<ChunkComparison>,
        /// Reduced overall comparison.
        summary: DocumentComparison,
    },
}

/// Output of one chat query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QaResponse {
    /// Answer text, or a generic apology when the query failed.
    pub answer: String,
    /// Question as asked.
    pub question: String,
    /// Rewritten standalone question, when the rewrite step ran and succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standalone_question: Option<String>,
    /// Whether an answer was produced.
    pub success: bool,
    /// Chunks used as context.
    pub retrieved_docs_count: usize,
    /// Failure detail when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_result_is_tagged_by_strategy() {
        let result = ComparisonResult::Holistic {
            result: DocumentComparison {
                similarities: vec!["both discuss pricing".into()],
                ..DocumentComparison::default()
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["strategy"], "holistic");
        assert_eq!(json["result"]["similarities"][0], "both discuss pricing");
    }

    #[test]
    fn merged_comparison_deduplicates_in_order() {
        let a = DocumentComparison {
            similarities: vec!["x".into(), "y".into()],
            ..DocumentComparison::default()
        };
        let b = DocumentComparison {
            similarities: vec!["y".into(), "z".into()],
            unique_to_b: vec!["w".into()],
            ..DocumentComparison::default()
        };
        let merged = DocumentComparison::merged([&a, &b]);
        assert_eq!(merged.similarities, vec!["x", "y", "z"]);
        assert_eq!(merged.unique_to_b, vec!["w"]);
    }
}
