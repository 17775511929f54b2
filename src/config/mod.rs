//! Settings registry backed by layered TOML files.
//!
//! Loading order:
//!
//! 1. `.env` is read through `dotenvy` so placeholders can reference values kept out of git.
//! 2. The base file (`config/settings.toml`, or `DOCSAGE_CONFIG`) is parsed.
//! 3. `settings.<env>.toml` next to it is deep-merged on top, where `<env>` comes from
//!    `DOCSAGE_ENV` (default `dev`). Nested tables merge key by key, anything else is replaced.
//! 4. `${VAR}` placeholders are resolved from the process environment. A miss on a required key
//!    (paths, defaults, model identity, API keys) aborts loading; other misses keep the literal
//!    text and are reported through [`Settings::report_unresolved_placeholders`].
//! 5. The merged tree is deserialized into [`Settings`] and cross-checked (defaults point at
//!    declared models, pipeline strategy mappings point at declared strategies).
//!
//! The loaded settings are immutable. The global handle installed by [`init_config`] exists for
//! the binaries; library code receives an `Arc<Settings>` explicitly.

mod schema;
mod sources;

pub use schema::{
    AnalysisConfig, ComparisonConfig, DefaultsConfig, EmbeddingProvider, LlmProvider,
    LogRotation, LoggingConfig, ModelEntry, ModelsConfig, PathsConfig, PreprocessingConfig,
    QaChatConfig, RetrievalConfig, ServerConfig, SessionsConfig, SplitterConfig,
    SplittingConfigs,
};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use sources::{
    UnresolvedPlaceholder, is_required_key, lookup_path, merge_tables, resolve_placeholders,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Environment variable overriding the base settings file location.
pub const CONFIG_PATH_ENV: &str = "DOCSAGE_CONFIG";
/// Environment variable selecting the override layer.
pub const ENVIRONMENT_ENV: &str = "DOCSAGE_ENV";
/// Base settings file used when `DOCSAGE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";
/// Environment layer used when `DOCSAGE_ENV` is unset.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

const REQUIRED_SECTIONS: [&str; 4] = ["api_keys", "paths", "models", "defaults"];

/// Errors raised while loading or querying settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A settings file could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A settings source was not valid TOML.
    #[error("failed to parse settings from {origin}: {source}")]
    Parse {
        /// File path or label of the offending source.
        origin: String,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },
    /// A required top-level table is absent.
    #[error("missing required settings section [{0}]")]
    MissingSection(String),
    /// A required key still contains a `${VAR}` placeholder after resolution.
    #[error("required setting '{key}' references unset environment variable '{variable}'")]
    UnresolvedPlaceholder {
        /// Dotted key holding the placeholder.
        key: String,
        /// Variable that was not set.
        variable: String,
    },
    /// The merged tree does not match the settings schema.
    #[error("invalid settings: {0}")]
    Schema(#[source] toml::de::Error),
    /// A model name is not declared under `[models]`.
    #[error("unknown {kind} model '{name}'")]
    UnknownModel {
        /// `llm` or `embedding`.
        kind: &'static str,
        /// Name that failed to resolve.
        name: String,
    },
    /// A splitter strategy name is not declared under `[splitting_configs]`.
    #[error("unknown splitting strategy '{0}'")]
    UnknownStrategy(String),
    /// A value is present but outside its accepted range.
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue {
        /// Dotted key of the rejected value.
        key: String,
        /// Human readable explanation.
        reason: String,
    },
}

/// Fully merged, validated settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Provider API keys (`openai = "${OPENAI_API_KEY}"`).
    pub api_keys: BTreeMap<String, String>,
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Named model declarations.
    pub models: ModelsConfig,
    /// Default model names.
    pub defaults: DefaultsConfig,
    /// Ingestion and cleaning options.
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    /// Named splitter strategies.
    #[serde(default)]
    pub splitting_configs: SplittingConfigs,
    /// Pipeline name to strategy name.
    #[serde(default)]
    pub pipeline_chunking_map: BTreeMap<String, String>,
    /// Retriever options.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Analysis pipeline options.
    #[serde(default)]
    pub document_analysis: AnalysisConfig,
    /// Comparison pipeline options.
    #[serde(default)]
    pub document_comparison: ComparisonConfig,
    /// Chat pipeline options.
    #[serde(default)]
    pub document_qa_chat: QaChatConfig,
    /// Session storage options.
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// HTTP server options.
    #[serde(default)]
    pub server: ServerConfig,
    /// Log filter and file rotation.
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    raw: toml::Table,
    #[serde(skip)]
    unresolved: Vec<UnresolvedPlaceholder>,
    #[serde(skip)]
    environment: String,
}

impl Settings {
    /// Load settings from the process environment: `.env`, `DOCSAGE_CONFIG`, `DOCSAGE_ENV`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let environment = std::env::var(ENVIRONMENT_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        Self::load(&path, &environment, |name| std::env::var(name).ok())
    }

    /// Load `base_path` plus its `settings.<environment>.toml` sibling when present.
    pub fn load<F>(base_path: &Path, environment: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = read_source(base_path)?;
        let override_path = override_path_for(base_path, environment);
        let overlay = if override_path.is_file() {
            tracing::debug!(path = %override_path.display(), "Applying environment settings layer");
            Some(read_source(&override_path)?)
        } else {
            None
        };
        Self::from_sources(
            &base,
            &base_path.display().to_string(),
            overlay.as_deref(),
            environment,
            lookup,
        )
    }

    /// Build settings from in-memory TOML sources.
    pub fn from_sources<F>(
        base: &str,
        origin: &str,
        overlay: Option<&str>,
        environment: &str,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut table = parse_table(base, origin)?;
        if let Some(overlay) = overlay {
            let overlay = parse_table(overlay, &format!("{origin} ({environment} layer)"))?;
            merge_tables(&mut table, overlay);
        }

        let mut unresolved = Vec::new();
        for placeholder in resolve_placeholders(&mut table, &lookup) {
            if is_required_key(&placeholder.key) {
                return Err(ConfigError::UnresolvedPlaceholder {
                    key: placeholder.key,
                    variable: placeholder.variable,
                });
            }
            unresolved.push(placeholder);
        }

        for section in REQUIRED_SECTIONS {
            if !matches!(table.get(section), Some(toml::Value::Table(_))) {
                return Err(ConfigError::MissingSection(section.to_string()));
            }
        }

        let mut settings: Settings = toml::Value::Table(table.clone())
            .try_into()
            .map_err(ConfigError::Schema)?;
        settings.raw = table;
        settings.unresolved = unresolved;
        settings.environment = environment.to_string();
        settings.validate()?;
        Ok(settings)
    }

    /// Warn about optional settings whose `${VAR}` placeholders were left as literal text.
    ///
    /// Loading happens before any subscriber exists, so the warnings are held on the settings
    /// and emitted once logging is up.
    pub fn report_unresolved_placeholders(&self) {
        for placeholder in &self.unresolved {
            tracing::warn!(
                key = %placeholder.key,
                variable = %placeholder.variable,
                "Settings placeholder unresolved; keeping literal text"
            );
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.get_llm_config(None)?;
        self.get_embedding_config(None)?;

        let splitting = &self.splitting_configs;
        if !splitting.strategies.is_empty()
            && !splitting.strategies.contains_key(&splitting.default_strategy)
        {
            return Err(ConfigError::UnknownStrategy(
                splitting.default_strategy.clone(),
            ));
        }
        for (pipeline, strategy) in &self.pipeline_chunking_map {
            if !splitting.strategies.contains_key(strategy) {
                return Err(ConfigError::InvalidValue {
                    key: format!("pipeline_chunking_map.{pipeline}"),
                    reason: format!("strategy '{strategy}' is not declared"),
                });
            }
        }
        for (name, strategy) in &splitting.strategies {
            if strategy.chunk_size == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("splitting_configs.{name}.chunk_size"),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retrieval.top_k".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.retrieval.lambda_mult) {
            return Err(ConfigError::InvalidValue {
                key: "retrieval.lambda_mult".into(),
                reason: "must be within [0, 1]".into(),
            });
        }
        if self.document_analysis.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "document_analysis.batch_size".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Name of the environment layer these settings were loaded with.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Look up a raw value by dotted path (`"retrieval.top_k"`).
    pub fn get(&self, dotted: &str) -> Option<&toml::Value> {
        lookup_path(&self.raw, dotted)
    }

    /// Look up and deserialize a value, returning `default` when it is missing or mistyped.
    pub fn get_or<T>(&self, dotted: &str, default: T) -> T
    where
        T: DeserializeOwned,
    {
        let Some(value) = self.get(dotted) else {
            tracing::debug!(key = dotted, "Setting not present; using default");
            return default;
        };
        match value.clone().try_into() {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(key = dotted, %error, "Setting has unexpected type; using default");
                default
            }
        }
    }

    /// Resolve a chat model declaration, falling back to `defaults.llm`.
    pub fn get_llm_config(
        &self,
        name: Option<&str>,
    ) -> Result<(&str, &ModelEntry<LlmProvider>), ConfigError> {
        let name = name.unwrap_or(self.defaults.llm.as_str());
        self.models
            .llms
            .get_key_value(name)
            .map(|(key, entry)| (key.as_str(), entry))
            .ok_or_else(|| ConfigError::UnknownModel {
                kind: "llm",
                name: name.to_string(),
            })
    }

    /// Resolve an embedding model declaration, falling back to `defaults.embedding`.
    pub fn get_embedding_config(
        &self,
        name: Option<&str>,
    ) -> Result<(&str, &ModelEntry<EmbeddingProvider>), ConfigError> {
        let name = name.unwrap_or(self.defaults.embedding.as_str());
        self.models
            .embeddings
            .get_key_value(name)
            .map(|(key, entry)| (key.as_str(), entry))
            .ok_or_else(|| ConfigError::UnknownModel {
                kind: "embedding",
                name: name.to_string(),
            })
    }

    /// Resolve a splitter strategy, falling back to `splitting_configs.default_strategy`.
    ///
    /// An empty `[splitting_configs]` still yields the built-in recursive character strategy.
    pub fn get_splitter_config(
        &self,
        strategy: Option<&str>,
    ) -> Result<(String, SplitterConfig), ConfigError> {
        let splitting = &self.splitting_configs;
        let name = strategy.unwrap_or(splitting.default_strategy.as_str());
        if let Some(config) = splitting.strategies.get(name) {
            return Ok((name.to_string(), config.clone()));
        }
        if splitting.strategies.is_empty() && name == splitting.default_strategy {
            return Ok((name.to_string(), builtin_splitter()));
        }
        Err(ConfigError::UnknownStrategy(name.to_string()))
    }

    /// Strategy name configured for a pipeline, or the default strategy.
    pub fn get_pipeline_chunking_strategy(&self, pipeline: &str) -> &str {
        self.pipeline_chunking_map
            .get(pipeline)
            .map(String::as_str)
            .unwrap_or(self.splitting_configs.default_strategy.as_str())
    }

    /// Step toggles for a pipeline section (`document_analysis`, ...).
    pub fn get_pipeline_steps(&self, pipeline: &str) -> BTreeMap<String, bool> {
        match pipeline {
            "document_analysis" => self.document_analysis.steps.clone(),
            "document_comparison" => self.document_comparison.steps.clone(),
            "document_qa_chat" => self.document_qa_chat.steps.clone(),
            other => self.get_or(&format!("{other}.steps"), BTreeMap::new()),
        }
    }
}

fn builtin_splitter() -> SplitterConfig {
    SplitterConfig {
        kind: Some(crate::processing::SplitterKind::RecursiveCharacter),
        chunk_size: 1000,
        chunk_overlap: 200,
        separators: None,
        separator: None,
        encoding: None,
    }
}

fn read_source(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_table(source: &str, origin: &str) -> Result<toml::Table, ConfigError> {
    source.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })
}

fn override_path_for(base_path: &Path, environment: &str) -> PathBuf {
    let stem = base_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("settings");
    base_path.with_file_name(format!("{stem}.{environment}.toml"))
}

/// Global settings handle populated during process start.
pub static CONFIG: OnceLock<Arc<Settings>> = OnceLock::new();

/// Retrieve the loaded settings, panicking if initialization has not occurred.
pub fn get_config() -> Arc<Settings> {
    CONFIG.get().cloned().expect("Config not initialized")
}

/// Load settings from the environment and install them in the global handle.
pub fn init_config() -> Result<Arc<Settings>, ConfigError> {
    let settings = Arc::new(Settings::from_env()?);
    tracing::debug!(
        environment = settings.environment(),
        llm = %settings.defaults.llm,
        embedding = %settings.defaults.embedding,
        "Loaded settings"
    );
    Ok(CONFIG.get_or_init(|| settings).clone())
}


#[cfg(test)]
mod tests {
    use super::test_support::{BASE, settings, settings_with};
    use super::*;

    #[test]
    fn loads_minimal_settings_and_applies_defaults() {
        let settings = settings();
        assert_eq!(settings.environment(), "test");
        assert_eq!(settings.retrieval.top_k, 5);
        assert_eq!(settings.document_analysis.batch_size, 10);
        assert_eq!(settings.paths.sessions_dir, PathBuf::from("sessions"));
        // unresolved non-required placeholder keeps literal text
        assert_eq!(settings.api_keys["openai"], "${OPENAI_API_KEY}");
    }

    #[test]
    fn overlay_replaces_scalars_and_keeps_siblings() {
        let settings = settings_with(
            r#"
            [retrieval]
            top_k = 9
            [splitting_configs.recursive_character]
            chunk_size = 400
            "#,
        );
        assert_eq!(settings.retrieval.top_k, 9);
        let (_, splitter) = settings
            .get_splitter_config(Some("recursive_character"))
            .unwrap();
        assert_eq!(splitter.chunk_size, 400);
        assert_eq!(splitter.chunk_overlap, 20);
    }

    #[test]
    fn missing_required_section_is_rejected() {
        let error = Settings::from_sources(
            "[paths]\n[models]\n[defaults]\nllm = \"a\"\nembedding = \"b\"\n",
            "inline",
            None,
            "dev",
            |_| None,
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::MissingSection(section) if section == "api_keys"));
    }

    #[test]
    fn unresolved_required_placeholder_fails_fast() {
        let error = settings_with_lookup(
            r#"
            [models.llms.remote]
            provider = "openai"
            params = { model = "gpt-4o-mini", api_key = "${REMOTE_KEY}" }
            "#,
            |_| None,
        )
        .unwrap_err();
        match error {
            ConfigError::UnresolvedPlaceholder { key, variable } => {
                assert_eq!(key, "models.llms.remote.params.api_key");
                assert_eq!(variable, "REMOTE_KEY");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn placeholders_resolve_through_lookup() {
        let settings = settings_with_lookup("", |name| {
            (name == "OPENAI_API_KEY").then(|| "sk-live".to_string())
        })
        .unwrap();
        assert_eq!(settings.api_keys["openai"], "sk-live");
    }

    #[test]
    fn defaults_must_reference_declared_models() {
        let error = settings_with_lookup("[defaults]\nllm = \"missing\"\n", |_| None).unwrap_err();
        assert!(matches!(error, ConfigError::UnknownModel { kind: "llm", .. }));
    }

    #[test]
    fn unknown_provider_is_a_schema_error() {
        let error = settings_with_lookup(
            "[models.llms.local]\nprovider = \"mystery\"\n",
            |_| None,
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::Schema(_)));
    }

    #[test]
    fn pipeline_strategy_resolution_falls_back_to_default() {
        let settings = settings();
        assert_eq!(
            settings.get_pipeline_chunking_strategy("document_comparison"),
            "character"
        );
        assert_eq!(
            settings.get_pipeline_chunking_strategy("document_analysis"),
            "recursive_character"
        );
        assert!(matches!(
            settings.get_splitter_config(Some("semantic")),
            Err(ConfigError::UnknownStrategy(name)) if name == "semantic"
        ));
    }

    #[test]
    fn generic_accessors_walk_dotted_paths() {
        let settings = settings();
        assert_eq!(
            settings.get("models.llms.local.params.model").and_then(|v| v.as_str()),
            Some("llama3")
        );
        assert_eq!(settings.get_or("retrieval.top_k", 3_usize), 3);
        assert_eq!(settings.get_or("splitting_configs.character.chunk_size", 0_usize), 100);
        let steps = settings.get_pipeline_steps("document_qa_chat");
        assert_eq!(steps.get("rewrite_question"), Some(&true));
    }

    #[test]
    fn load_reads_environment_layer_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("settings.toml");
        std::fs::write(&base, BASE).unwrap();
        std::fs::write(
            dir.path().join("settings.prod.toml"),
            "[retrieval]\nsearch_type = \"mmr\"\n",
        )
        .unwrap();

        let prod = Settings::load(&base, "prod", |_| None).unwrap();
        assert_eq!(prod.retrieval.search_type, crate::retrieval::SearchType::Mmr);
        let dev = Settings::load(&base, "dev", |_| None).unwrap();
        assert_eq!(dev.retrieval.search_type, crate::retrieval::SearchType::Similarity);
    }

    #[test]
    fn unresolved_optional_placeholders_are_reported_when_asked() {
        let logs = crate::logging::test_support::CapturedLogs::default();
        let settings = tracing::subscriber::with_default(logs.subscriber(), settings);
        assert!(!logs.contents().contains("OPENAI_API_KEY"));

        tracing::subscriber::with_default(logs.subscriber(), || {
            settings.report_unresolved_placeholders()
        });
        let output = logs.contents();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("api_keys.openai"), "{output}");
        assert!(output.contains("OPENAI_API_KEY"), "{output}");
    }

    #[test]
    fn logging_section_defaults_and_overrides() {
        assert_eq!(settings().logging.level, "info");
        assert_eq!(settings().logging.rotation, LogRotation::Never);
        let custom = settings_with("[logging]\nlevel = \"debug\"\nrotation = \"daily\"\n");
        assert_eq!(custom.logging.level, "debug");
        assert_eq!(custom.logging.rotation, LogRotation::Daily);
    }

    fn settings_with_lookup<F>(overlay: &str, lookup: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Settings::from_sources(BASE, "test", Some(overlay), "test", lookup)
    }
}
