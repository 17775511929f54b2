//! Prompt catalog: named templates grouped by pipeline section, reloadable at runtime.
//!
//! Templates use `{name}` placeholders. `{{` and `}}` render as literal braces, and any `{...}`
//! group that does not name a known variable is left untouched so JSON examples survive.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Environment variable overriding the prompt catalog location.
pub const PROMPTS_PATH_ENV: &str = "DOCSAGE_PROMPTS";
/// Prompt catalog used when `DOCSAGE_PROMPTS` is unset.
pub const DEFAULT_PROMPTS_PATH: &str = "config/prompts.toml";

/// Errors raised while loading or rendering prompts.
#[derive(Debug, Error)]
pub enum PromptError {
    /// The catalog file could not be read.
    #[error("failed to read prompt catalog {path}: {source}")]
    Read {
        /// Catalog location.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The catalog was not valid TOML or did not match the catalog layout.
    #[error("failed to parse prompt catalog {origin}: {source}")]
    Parse {
        /// Catalog location or label.
        origin: String,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },
    /// A declared input variable was not supplied.
    #[error("prompt variable '{0}' was not provided")]
    MissingVariable(String),
    /// The registry has no backing file to reload from.
    #[error("prompt registry was built in memory and cannot be reloaded")]
    NotReloadable,
}

/// A single prompt template.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PromptTemplate {
    /// Template text with `{name}` placeholders.
    pub template: String,
    /// Variables the template expects, in declaration order.
    #[serde(default)]
    pub input_variables: Vec<String>,
}

impl PromptTemplate {
    /// Create a template from text and its declared variables.
    pub fn new(template: impl Into<String>, input_variables: &[&str]) -> Self {
        Self {
            template: template.into(),
            input_variables: input_variables.iter().map(|name| name.to_string()).collect(),
        }
    }

    /// First declared variable, the slot a single-input step binds its text to.
    pub fn primary_variable(&self) -> Option<&str> {
        self.input_variables.first().map(String::as_str)
    }

    /// Whether the template text references `{name}`.
    pub fn references(&self, name: &str) -> bool {
        self.template.contains(&format!("{{{name}}}"))
    }

    /// Substitute `vars` into the template in a single pass.
    ///
    /// Every declared input variable must be supplied. Values are inserted verbatim and never
    /// rescanned for placeholders.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        for declared in &self.input_variables {
            if !vars.iter().any(|(name, _)| name == declared) {
                return Err(PromptError::MissingVariable(declared.clone()));
            }
        }

        let template = self.template.as_str();
        let mut output = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(position) = rest.find(['{', '}']) {
            output.push_str(&rest[..position]);
            let tail = &rest[position..];
            if tail.starts_with("{{") {
                output.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                output.push('}');
                rest = &tail[2..];
            } else if tail.starts_with('{') {
                match tail[1..].find('}') {
                    Some(end) => {
                        let name = &tail[1..=end];
                        match vars.iter().find(|(key, _)| *key == name) {
                            Some((_, value)) => output.push_str(value),
                            None => output.push_str(&tail[..end + 2]),
                        }
                        rest = &tail[end + 2..];
                    }
                    None => {
                        output.push_str(tail);
                        rest = "";
                    }
                }
            } else {
                output.push('}');
                rest = &tail[1..];
            }
        }
        output.push_str(rest);
        Ok(output)
    }
}

/// Immutable set of templates keyed by section then step.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct PromptCatalog {
    sections: BTreeMap<String, BTreeMap<String, PromptTemplate>>,
}

impl PromptCatalog {
    /// Parse a catalog from TOML text (`[section.step]` tables).
    pub fn from_toml_str(source: &str, origin: &str) -> Result<Self, PromptError> {
        toml::from_str(source).map_err(|source| PromptError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Read and parse a catalog file.
    pub fn from_path(path: &Path) -> Result<Self, PromptError> {
        let source = std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source, &path.display().to_string())
    }

    /// Add or replace a template.
    pub fn insert(&mut self, section: &str, step: &str, template: PromptTemplate) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(step.to_string(), template);
    }

    /// Look up a template.
    pub fn get(&self, section: &str, step: &str) -> Option<&PromptTemplate> {
        self.sections.get(section)?.get(step)
    }

    /// Total number of templates.
    pub fn len(&self) -> usize {
        self.sections.values().map(BTreeMap::len).sum()
    }

    /// Whether the catalog holds no templates.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared, reloadable prompt catalog.
///
/// Readers take a snapshot (`Arc<PromptCatalog>`) at the start of a run, so a concurrent
/// [`PromptRegistry::reload`] never changes the prompts of a run already in flight.
#[derive(Debug)]
pub struct PromptRegistry {
    path: Option<PathBuf>,
    current: RwLock<Arc<PromptCatalog>>,
}

impl PromptRegistry {
    /// Load the catalog from `path` and remember it for reloads.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PromptError> {
        let path = path.into();
        let catalog = PromptCatalog::from_path(&path)?;
        tracing::info!(path = %path.display(), prompts = catalog.len(), "Loaded prompt catalog");
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(catalog)),
        })
    }

    /// Load from `DOCSAGE_PROMPTS` or the default catalog path.
    pub fn from_env() -> Result<Self, PromptError> {
        let path = std::env::var(PROMPTS_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROMPTS_PATH.to_string());
        Self::load(path)
    }

    /// Wrap an in-memory catalog.
    pub fn from_catalog(catalog: PromptCatalog) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Current catalog.
    pub fn snapshot(&self) -> Arc<PromptCatalog> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Clone a single template out of the current catalog.
    pub fn get_prompt(&self, section: &str, step: &str) -> Option<PromptTemplate> {
        self.snapshot().get(section, step).cloned()
    }

    /// Re-read the catalog file and swap it in atomically. Returns the new template count.
    ///
    /// On failure the previous catalog stays active.
    pub fn reload(&self) -> Result<usize, PromptError> {
        let path = self.path.as_ref().ok_or(PromptError::NotReloadable)?;
        let catalog = PromptCatalog::from_path(path)?;
        let count = catalog.len();
        let next = Arc::new(catalog);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!(path = %path.display(), prompts = count, "Reloaded prompt catalog");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_declared_variables_once() {
        let prompt = PromptTemplate::new("Summarize:\n{text}\nEnd", &["text"]);
        let rendered = prompt.render(&[("text", "value with {text} inside")]).unwrap();
        assert_eq!(rendered, "Summarize:\nvalue with {text} inside\nEnd");
    }

    #[test]
    fn render_keeps_unknown_groups_and_unescapes_double_braces() {
        let prompt = PromptTemplate::new(
            "Return {{\"summary\": \"...\"}} for {text}; ignore {other}",
            &["text"],
        );
        let rendered = prompt.render(&[("text", "doc")]).unwrap();
        assert_eq!(
            rendered,
            "Return {\"summary\": \"...\"} for doc; ignore {other}"
        );
    }

    #[test]
    fn render_requires_declared_variables() {
        let prompt = PromptTemplate::new("{context} / {question}", &["context", "question"]);
        let error = prompt.render(&[("context", "c")]).unwrap_err();
        assert!(matches!(error, PromptError::MissingVariable(name) if name == "question"));
    }

    #[test]
    fn catalog_parses_sections_and_steps() {
        let catalog = PromptCatalog::from_toml_str(
            r#"
            [document_analysis.summary_map]
            template = "Summarize {text}"
            input_variables = ["text"]

            [document_qa_chat.answer_using_context]
            template = "{context} {question}"
            input_variables = ["context", "question"]
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(catalog.len(), 2);
        let map = catalog.get("document_analysis", "summary_map").unwrap();
        assert_eq!(map.primary_variable(), Some("text"));
        assert!(catalog.get("document_analysis", "keywords").is_none());
    }

    #[test]
    fn reload_swaps_catalog_without_touching_existing_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.toml");
        std::fs::write(&path, "[s.a]\ntemplate = \"first\"\n").unwrap();

        let registry = PromptRegistry::load(&path).unwrap();
        let before = registry.snapshot();

        std::fs::write(&path, "[s.a]\ntemplate = \"second\"\n[s.b]\ntemplate = \"x\"\n").unwrap();
        assert_eq!(registry.reload().unwrap(), 2);

        assert_eq!(before.get("s", "a").unwrap().template, "first");
        assert_eq!(registry.get_prompt("s", "a").unwrap().template, "second");
    }

    #[test]
    fn failed_reload_keeps_previous_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.toml");
        std::fs::write(&path, "[s.a]\ntemplate = \"first\"\n").unwrap();
        let registry = PromptRegistry::load(&path).unwrap();

        std::fs::write(&path, "not = [valid").unwrap();
        assert!(registry.reload().is_err());
        assert_eq!(registry.get_prompt("s", "a").unwrap().template, "first");
    }

    #[test]
    fn in_memory_registry_is_not_reloadable() {
        let registry = PromptRegistry::from_catalog(PromptCatalog::default());
        assert!(matches!(registry.reload(), Err(PromptError::NotReloadable)));
    }
}
