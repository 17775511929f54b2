//! Text cleaning applied between ingestion and chunking.

use crate::document::Document;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Cleaning toggles read from `[preprocessing]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Lowercase all text.
    pub lowercase: bool,
    /// Trim leading and trailing whitespace.
    pub strip_whitespace: bool,
    /// Collapse whitespace runs into a single space.
    pub normalize_spaces: bool,
    /// Replace characters outside letters, digits, whitespace, and basic punctuation with a space.
    pub remove_special_chars: bool,
    /// Replace digit runs with a space.
    pub remove_numeric: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            lowercase: true,
            strip_whitespace: true,
            normalize_spaces: true,
            remove_special_chars: false,
            remove_numeric: false,
        }
    }
}

fn whitespace_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex is valid"))
}

fn special_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"[^a-zA-Z0-9\s.,!?;:()'"]+"#).expect("special character regex is valid")
    })
}

fn digit_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("digit regex is valid"))
}

/// Applies [`PreprocessOptions`] to documents.
///
/// Steps run as lowercase, special characters, digits, space normalization, then trimming, so
/// replacements never leave behind whitespace a later pass would change again.
#[derive(Clone, Copy, Debug, Default)]
pub struct Preprocessor {
    options: PreprocessOptions,
}

impl Preprocessor {
    /// Create a preprocessor with the given toggles.
    pub fn new(options: PreprocessOptions) -> Self {
        Self { options }
    }

    /// Active toggles.
    pub fn options(&self) -> PreprocessOptions {
        self.options
    }

    /// Clean a single string.
    pub fn clean_text(&self, text: &str) -> String {
        let options = self.options;
        let mut text = if options.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        if options.remove_special_chars {
            text = special_chars().replace_all(&text, " ").into_owned();
        }
        if options.remove_numeric {
            text = digit_runs().replace_all(&text, " ").into_owned();
        }
        if options.normalize_spaces {
            text = whitespace_runs().replace_all(&text, " ").into_owned();
        }
        if options.strip_whitespace {
            text = text.trim().to_string();
        }
        text
    }

    /// Clean every document, recording `char_length` and `word_count` on the output metadata.
    pub fn transform(&self, documents: &[Document]) -> Vec<Document> {
        let processed: Vec<Document> = documents
            .iter()
            .map(|document| {
                let text = self.clean_text(&document.content);
                let mut cleaned = document.with_content(text);
                cleaned.metadata.char_length = Some(cleaned.content.chars().count());
                cleaned.metadata.word_count = Some(cleaned.content.split_whitespace().count());
                cleaned
            })
            .collect();
        tracing::info!(documents = processed.len(), "Preprocessing complete");
        processed
    }
}
