//! Prompt chains: a template bound to a model, optionally parsing JSON output.

use super::types::StepInvocationError;
use crate::llm::LlmClient;
use crate::prompts::PromptTemplate;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

const FORMAT_INSTRUCTIONS_VAR: &str = "format_instructions";

/// A rendered-template-to-text model step.
#[derive(Clone)]
pub struct PromptChain {
    step: String,
    template: PromptTemplate,
    llm: Arc<dyn LlmClient>,
}

impl PromptChain {
    /// Bind `template` to `llm` under a step name used in logs and errors.
    pub fn new(step: impl Into<String>, template: PromptTemplate, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            step: step.into(),
            template,
            llm,
        }
    }

    /// Step name.
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Declared template variables.
    pub fn variables(&self) -> &[String] {
        &self.template.input_variables
    }

    /// Render the template and call the model.
    pub async fn invoke(&self, vars: &[(&str, &str)]) -> Result<String, StepInvocationError> {
        let prompt = self.render(vars)?;
        self.call(&prompt).await
    }

    /// Bind `text` to the template's first declared variable and invoke.
    pub async fn invoke_single(&self, text: &str) -> Result<String, StepInvocationError> {
        let name = self.template.primary_variable().unwrap_or("text");
        self.invoke(&[(name, text)]).await
    }

    fn render(&self, vars: &[(&str, &str)]) -> Result<String, StepInvocationError> {
        self.template
            .render(vars)
            .map_err(|source| StepInvocationError::Render {
                step: self.step.clone(),
                source,
            })
    }

    async fn call(&self, prompt: &str) -> Result<String, StepInvocationError> {
        tracing::debug!(step = %self.step, model = self.llm.model(), chars = prompt.len(), "Invoking step");
        self.llm
            .invoke(prompt)
            .await
            .map_err(|source| StepInvocationError::Llm {
                step: self.step.clone(),
                source,
            })
    }
}

/// A chain whose output must parse as `T`.
///
/// The JSON schema of `T` is supplied to the model as format instructions, either through a
/// `{format_instructions}` placeholder in the template or appended to the rendered prompt. Output
/// that fails to parse gets one repair prompt before the step fails.
pub struct StructuredChain<T> {
    chain: PromptChain,
    instructions: String,
    _output: PhantomData<fn() -> T>,
}

impl<T> StructuredChain<T>
where
    T: DeserializeOwned + JsonSchema,
{
    /// Wrap a plain chain.
    pub fn new(chain: PromptChain) -> Self {
        Self {
            chain,
            instructions: format_instructions::<T>(),
            _output: PhantomData,
        }
    }

    /// Underlying plain chain.
    pub fn chain(&self) -> &PromptChain {
        &self.chain
    }

    /// Bind `text` to the template's first declared variable, invoke, and parse.
    pub async fn invoke_single(&self, text: &str) -> Result<T, StepInvocationError> {
        let name = self.chain.template.primary_variable().unwrap_or("text");
        self.invoke(&[(name, text)]).await
    }

    /// Render, invoke, and parse; repair once on a schema mismatch.
    pub async fn invoke(&self, vars: &[(&str, &str)]) -> Result<T, StepInvocationError> {
        let template = &self.chain.template;
        let wants_instructions = template.references(FORMAT_INSTRUCTIONS_VAR)
            || template
                .input_variables
                .iter()
                .any(|name| name == FORMAT_INSTRUCTIONS_VAR);
        let prompt = if wants_instructions {
            let mut with_instructions: Vec<(&str, &str)> = vars.iter().copied().collect();
            with_instructions.push((FORMAT_INSTRUCTIONS_VAR, self.instructions.as_str()));
            self.chain.render(&with_instructions)?
        } else {
            format!("{}\n\n{}", self.chain.render(vars)?, self.instructions)
        };

        let raw = self.chain.call(&prompt).await?;
        let reason = match parse_output::<T>(&raw) {
            Ok(value) => return Ok(value),
            Err(reason) => reason,
        };

        tracing::warn!(step = %self.chain.step, %reason, "Output did not match schema; requesting repair");
        let repair = format!(
            "Your previous response did not match the required format.\n\
             Parse error: {reason}\n\
             Previous response:\n{raw}\n\n\
             {instructions}\n\
             Return only the corrected JSON object.",
            instructions = self.instructions
        );
        let repaired = self.chain.call(&repair).await?;
        parse_output::<T>(&repaired).map_err(|reason| StepInvocationError::Schema {
            step: self.chain.step.clone(),
            reason,
        })
    }
}

fn format_instructions<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    let rendered = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!(
        "Respond with a single JSON object that conforms to this JSON schema. Do not add prose \
         before or after the JSON.\n```json\n{rendered}\n```"
    )
}

fn parse_output<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let candidate = extract_json(raw).ok_or_else(|| "no JSON object found in output".to_string())?;
    serde_json::from_str(candidate).map_err(|error| error.to_string())
}

/// Locate the JSON object in a model response, tolerating code fences and surrounding prose.
pub(crate) fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::ScriptedLlm;
    use crate::pipeline::types::DocumentComparison;

    #[test]
    fn extract_json_strips_fences_and_prose() {
        let raw = "Sure!\n```json\n{\"a\": {\"b\": 1}}\n```\nDone.";
        assert_eq!(extract_json(raw), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[tokio::test]
    async fn instructions_fill_placeholder_when_present() {
        let llm = ScriptedLlm::replying(|_| Ok(r#"{"similarities": ["s"]}"#.into()));
        let template = PromptTemplate::new(
            "Compare {document_a} with {document_b}.\n{format_instructions}",
            &["document_a", "document_b"],
        );
        let chain: StructuredChain<DocumentComparison> =
            StructuredChain::new(PromptChain::new("holistic_compare", template, llm.clone()));
        let result = chain
            .invoke(&[("document_a", "A"), ("document_b", "B")])
            .await
            .unwrap();
        assert_eq!(result.similarities, vec!["s"]);

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("JSON schema"));
        assert!(prompts[0].contains("unique_to_a"));
        assert!(!prompts[0].contains("{format_instructions}"));
    }

    #[tokio::test]
    async fn malformed_output_is_repaired_once() {
        let llm = ScriptedLlm::sequence(vec![
            Ok("not json".into()),
            Ok(r#"{"differences": ["d"]}"#.into()),
        ]);
        let chain: StructuredChain<DocumentComparison> = StructuredChain::new(PromptChain::new(
            "compare_docs",
            PromptTemplate::new("Compare {a}", &["a"]),
            llm.clone(),
        ));
        let result = chain.invoke(&[("a", "x")]).await.unwrap();
        assert_eq!(result.differences, vec!["d"]);
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("not json"));
    }

    #[tokio::test]
    async fn second_schema_failure_is_reported() {
        let llm = ScriptedLlm::replying(|_| Ok("still not json".into()));
        let chain: StructuredChain<DocumentComparison> = StructuredChain::new(PromptChain::new(
            "compare_docs",
            PromptTemplate::new("Compare {a}", &["a"]),
            llm.clone(),
        ));
        let error = chain.invoke(&[("a", "x")]).await.unwrap_err();
        assert!(matches!(error, StepInvocationError::Schema { .. }));
        assert_eq!(llm.prompts().len(), 2);
    }
}
