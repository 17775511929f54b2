//! Config-driven pipelines: analysis, comparison, and document chat.
//!
//! Every pipeline is assembled from the settings and a prompt catalog snapshot. Step toggles come
//! from `[<section>.steps]`; templates come from the `<section>.<step>` entries in the catalog.

pub mod analysis;
pub mod chain;
pub mod comparison;
mod prepare;
pub mod qa_chat;
#[cfg(test)]
pub(crate) mod test_support;
pub mod types;

pub use analysis::AnalysisPipeline;
pub use chain::{PromptChain, StructuredChain};
pub use comparison::{ComparisonPipeline, ComparisonStrategy};
pub use qa_chat::QaChatPipeline;
pub use types::{
    AnalysisResult, ChunkComparison, ComparisonResult, DocumentComparison, KeywordList,
    PipelineError, QaResponse, StepInvocationError,
};

use crate::config::Settings;
use crate::prompts::{PromptCatalog, PromptTemplate};

/// Settings and prompt section of the analysis pipeline.
pub const ANALYSIS_SECTION: &str = "document_analysis";
/// Settings and prompt section of the comparison pipeline.
pub const COMPARISON_SECTION: &str = "document_comparison";
/// Settings and prompt section of the chat pipeline.
pub const QA_CHAT_SECTION: &str = "document_qa_chat";

/// Whether `step` is switched on for `section`; unlisted steps take `default`.
pub(crate) fn step_enabled(settings: &Settings, section: &str, step: &str, default: bool) -> bool {
    settings
        .get_pipeline_steps(section)
        .get(step)
        .copied()
        .unwrap_or(default)
}

/// Template for an enabled step, or `None` when the step is off or has no prompt.
pub(crate) fn optional_step(
    settings: &Settings,
    prompts: &PromptCatalog,
    section: &'static str,
    step: &'static str,
    default: bool,
) -> Option<PromptTemplate> {
    if !step_enabled(settings, section, step, default) {
        tracing::debug!(section, step, "Step disabled");
        return None;
    }
    let template = prompts.get(section, step).cloned();
    if template.is_none() {
        tracing::warn!(section, step, "Step enabled but no prompt is configured");
    }
    template
}

/// Template for a step the pipeline cannot run without.
pub(crate) fn required_step(
    settings: &Settings,
    prompts: &PromptCatalog,
    section: &'static str,
    step: &'static str,
) -> Result<PromptTemplate, PipelineError> {
    optional_step(settings, prompts, section, step, true)
        .ok_or(PipelineError::MissingStep { section, step })
}

/// Truncate to at most `limit` characters.
pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
