//! Raw TOML handling: deep merge of layered sources and `${VAR}` placeholder resolution.

use regex::Regex;
use std::sync::OnceLock;
use toml::{Table, Value};

/// Placeholder that could not be resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnresolvedPlaceholder {
    /// Dotted path of the value containing the placeholder.
    pub key: String,
    /// Name of the environment variable that was missing.
    pub variable: String,
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
    })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other value in the overlay
/// replaces the base value outright (arrays included).
pub(crate) fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Replace `${VAR}` occurrences in every string of `table` using `lookup`.
///
/// Placeholders whose variable is unknown stay as literal text and are reported back so the
/// caller can decide whether the affected key is required.
pub(crate) fn resolve_placeholders<F>(table: &mut Table, lookup: &F) -> Vec<UnresolvedPlaceholder>
where
    F: Fn(&str) -> Option<String>,
{
    let mut unresolved = Vec::new();
    for (key, value) in table.iter_mut() {
        resolve_value(value, key, lookup, &mut unresolved);
    }
    unresolved
}

fn resolve_value<F>(
    value: &mut Value,
    path: &str,
    lookup: &F,
    unresolved: &mut Vec<UnresolvedPlaceholder>,
) where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => {
            if let Some(resolved) = resolve_string(text, path, lookup, unresolved) {
                *text = resolved;
            }
        }
        Value::Table(table) => {
            for (key, nested) in table.iter_mut() {
                resolve_value(nested, &format!("{path}.{key}"), lookup, unresolved);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter_mut().enumerate() {
                resolve_value(nested, &format!("{path}[{index}]"), lookup, unresolved);
            }
        }
        _ => {}
    }
}

fn resolve_string<F>(
    text: &str,
    path: &str,
    lookup: &F,
    unresolved: &mut Vec<UnresolvedPlaceholder>,
) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = placeholder_pattern();
    if !pattern.is_match(text) {
        return None;
    }
    let replaced = pattern.replace_all(text, |captures: &regex::Captures<'_>| {
        let variable = &captures[1];
        match lookup(variable) {
            Some(value) => value,
            None => {
                unresolved.push(UnresolvedPlaceholder {
                    key: path.to_string(),
                    variable: variable.to_string(),
                });
                captures[0].to_string()
            }
        }
    });
    Some(replaced.into_owned())
}

/// Whether a dotted key must resolve for the settings to be usable.
///
/// Paths, defaults, model identifiers, providers, and API keys cannot run on literal
/// `${VAR}` text.
pub(crate) fn is_required_key(key: &str) -> bool {
    let segments: Vec<&str> = key.split('.').collect();
    match segments.as_slice() {
        ["paths", ..] | ["defaults", ..] => true,
        ["models", "llms" | "embeddings", _, "provider"] => true,
        ["models", "llms" | "embeddings", _, "params", "model" | "api_key"] => true,
        _ => false,
    }
}

/// Walk a dotted path through nested tables.
pub(crate) fn lookup_path<'a>(table: &'a Table, dotted: &str) -> Option<&'a Value> {
    let mut segments = dotted.split('.');
    let first = segments.next()?;
    let mut current = table.get(first)?;
    for segment in segments {
        current = current.as_table()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(source: &str) -> Table {
        source.parse::<Table>().expect("valid toml")
    }

    #[test]
    fn merge_replaces_scalars_and_merges_nested_tables() {
        let mut base = parse(
            r#"
            [retrieval]
            top_k = 5
            search_type = "similarity"
            [retrieval.extra]
            a = 1
            "#,
        );
        let overlay = parse(
            r#"
            [retrieval]
            top_k = 8
            [retrieval.extra]
            b = 2
            "#,
        );

        merge_tables(&mut base, overlay);

        assert_eq!(lookup_path(&base, "retrieval.top_k"), Some(&Value::Integer(8)));
        assert_eq!(
            lookup_path(&base, "retrieval.search_type").and_then(Value::as_str),
            Some("similarity")
        );
        assert_eq!(lookup_path(&base, "retrieval.extra.a"), Some(&Value::Integer(1)));
        assert_eq!(lookup_path(&base, "retrieval.extra.b"), Some(&Value::Integer(2)));
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let mut base = parse(r#"exts = [".txt", ".md"]"#);
        merge_tables(&mut base, parse(r#"exts = [".pdf"]"#));
        let exts = base["exts"].as_array().expect("array");
        assert_eq!(exts.len(), 1);
        assert_eq!(exts[0].as_str(), Some(".pdf"));
    }

    #[test]
    fn placeholders_resolve_from_lookup_and_record_misses() {
        let mut table = parse(
            r#"
            [api_keys]
            openai = "${OPENAI_API_KEY}"
            [paths]
            logs_dir = "${HOME_DIR}/logs"
            [notes]
            list = ["${MISSING}", "plain"]
            "#,
        );
        let env: HashMap<&str, &str> = [("OPENAI_API_KEY", "sk-test"), ("HOME_DIR", "/srv")]
            .into_iter()
            .collect();

        let unresolved = resolve_placeholders(&mut table, &|name: &str| {
            env.get(name).map(|value| value.to_string())
        });

        assert_eq!(
            lookup_path(&table, "api_keys.openai").and_then(Value::as_str),
            Some("sk-test")
        );
        assert_eq!(
            lookup_path(&table, "paths.logs_dir").and_then(Value::as_str),
            Some("/srv/logs")
        );
        assert_eq!(
            unresolved,
            vec![UnresolvedPlaceholder {
                key: "notes.list[0]".into(),
                variable: "MISSING".into(),
            }]
        );
        let list = lookup_path(&table, "notes.list").and_then(Value::as_array).unwrap();
        assert_eq!(list[0].as_str(), Some("${MISSING}"));
    }

    #[test]
    fn required_keys_cover_paths_defaults_and_model_identity() {
        assert!(is_required_key("paths.logs_dir"));
        assert!(is_required_key("defaults.llm"));
        assert!(is_required_key("models.llms.local.params.model"));
        assert!(is_required_key("models.llms.remote.params.api_key"));
        assert!(is_required_key("models.embeddings.e5.provider"));
        assert!(!is_required_key("models.llms.local.params.temperature"));
        assert!(!is_required_key("api_keys.openai"));
        assert!(!is_required_key("retrieval.top_k"));
    }
}
