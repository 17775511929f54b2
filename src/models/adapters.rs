//! Per-provider parameter adapters.
//!
//! Settings may use generic parameter names (`max_output_tokens`, `base_url`, ...) or a
//! provider's native names. Each adapter lists the native names a backend accepts; generic names
//! map to the first native candidate that backend accepts. Native names win over generic ones
//! when both are present, and anything unrecognized is dropped with a warning.

use std::collections::BTreeMap;

/// Generic parameter name and its native candidates in priority order.
const GENERIC_CANDIDATES: [(&str, &[&str]); 8] = [
    ("model", &["model", "model_name"]),
    ("temperature", &["temperature"]),
    (
        "max_output_tokens",
        &["max_tokens", "num_predict", "max_completion_tokens"],
    ),
    ("top_p", &["top_p"]),
    ("base_url", &["base_url", "host"]),
    ("api_key", &["api_key"]),
    ("timeout_secs", &["timeout_secs"]),
    ("dimension", &["dimensions", "dimension"]),
];

/// Native parameter set accepted by one backend.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProviderAdapter {
    pub(crate) provider: &'static str,
    accepted: &'static [&'static str],
}

pub(crate) const OLLAMA_LLM: ProviderAdapter = ProviderAdapter {
    provider: "ollama",
    accepted: &["model", "base_url", "temperature", "num_predict", "top_p", "timeout_secs"],
};

pub(crate) const OPENAI_LLM: ProviderAdapter = ProviderAdapter {
    provider: "openai",
    accepted: &[
        "model",
        "base_url",
        "api_key",
        "temperature",
        "max_tokens",
        "top_p",
        "timeout_secs",
    ],
};

pub(crate) const OLLAMA_EMBEDDING: ProviderAdapter = ProviderAdapter {
    provider: "ollama",
    accepted: &["model", "base_url", "timeout_secs"],
};

pub(crate) const OPENAI_EMBEDDING: ProviderAdapter = ProviderAdapter {
    provider: "openai",
    accepted: &["model", "base_url", "api_key", "dimensions", "timeout_secs"],
};

pub(crate) const HASHING_EMBEDDING: ProviderAdapter = ProviderAdapter {
    provider: "hashing",
    accepted: &["model", "dimension"],
};

impl ProviderAdapter {
    fn accepts(&self, name: &str) -> bool {
        self.accepted.contains(&name)
    }

    /// Translate settings parameters into this backend's native names.
    pub(crate) fn remap(&self, model_name: &str, params: &toml::Table) -> ProviderParams {
        let mut values = BTreeMap::new();

        for (key, value) in params {
            if self.accepts(key) {
                values.insert(key.clone(), value.clone());
            }
        }

        for (key, value) in params {
            if self.accepts(key) {
                continue;
            }
            let target = GENERIC_CANDIDATES
                .iter()
                .find(|(generic, _)| *generic == key.as_str())
                .and_then(|(_, candidates)| {
                    candidates.iter().copied().find(|candidate| self.accepts(candidate))
                });
            match target {
                Some(native) if values.contains_key(native) => {
                    tracing::debug!(
                        model = model_name,
                        provider = self.provider,
                        parameter = %key,
                        native,
                        "Native parameter already set; ignoring generic alias"
                    );
                }
                Some(native) => {
                    values.insert(native.to_string(), value.clone());
                }
                None => {
                    tracing::warn!(
                        model = model_name,
                        provider = self.provider,
                        parameter = %key,
                        "Dropping parameter not supported by provider"
                    );
                }
            }
        }

        ProviderParams { values }
    }
}

/// Parameters already translated to a backend's native names.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderParams {
    values: BTreeMap<String, toml::Value>,
}

impl ProviderParams {
    /// Build from explicit native key/value pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, toml::Value)>,
        K: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Insert a value unless the key is already present.
    pub fn insert_missing(&mut self, key: &str, value: toml::Value) {
        self.values.entry(key.to_string()).or_insert(value);
    }

    /// Non-empty string value.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(toml::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Numeric value (float or integer).
    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            toml::Value::Float(value) => Some(*value),
            toml::Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Non-negative integer value.
    pub fn u64(&self, key: &str) -> Option<u64> {
        self.values
            .get(key)
            .and_then(toml::Value::as_integer)
            .and_then(|value| u64::try_from(value).ok())
    }

    /// Native keys present.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
