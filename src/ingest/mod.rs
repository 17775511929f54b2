//! Document ingestion: resolve files and directories into [`Document`]s.
//!
//! Loader selection is table driven (`preprocessing.loader_map`), with SQLite files
//! (`.db`, `.sqlite`) always routed to the table exporter. Directory scans skip extensions
//! outside `preprocessing.supported_exts` and log-and-skip files that fail to load.

mod extract;
mod sqlite;

use crate::config::PreprocessingConfig;
use crate::document::Document;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors produced while loading documents.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// No loader is mapped to the file's extension.
    #[error("unsupported file format '{extension}' for {path}")]
    UnsupportedFormat {
        /// File that was rejected.
        path: PathBuf,
        /// Lowercased extension including the dot (empty when absent).
        extension: String,
    },
    /// Directory scan target does not exist.
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A binary format could not be converted to text.
    #[error("failed to extract {kind} text: {message}")]
    Extraction {
        /// Format being extracted.
        kind: &'static str,
        /// Extractor diagnostic.
        message: String,
    },
    /// A SQLite database could not be exported.
    #[error("failed to read SQLite database {path}: {source}")]
    Sqlite {
        /// Database file.
        path: PathBuf,
        /// Driver error.
        #[source]
        source: rusqlite::Error,
    },
}

/// Loader families selectable from `preprocessing.loader_map`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// UTF-8 text (lossy).
    Text,
    /// Markdown kept as raw text.
    Markdown,
    /// CSV kept as raw text.
    Csv,
    /// JSON, pretty-printed when it parses.
    Json,
    /// PDF text layer.
    Pdf,
    /// Word document paragraphs.
    Docx,
    /// PowerPoint slide text.
    Pptx,
    /// Excel sheets rendered as comma-joined rows.
    Xlsx,
    /// SQLite tables exported as CSV.
    Sqlite,
}

const SQLITE_EXTENSIONS: [&str; 2] = [".db", ".sqlite"];

/// Config-driven document loader.
#[derive(Clone, Debug)]
pub struct DocumentIngestor {
    supported_exts: BTreeSet<String>,
    loader_map: BTreeMap<String, LoaderKind>,
}

impl DocumentIngestor {
    /// Build an ingestor from the `[preprocessing]` settings.
    pub fn new(config: &PreprocessingConfig) -> Self {
        let supported_exts: BTreeSet<String> = config
            .supported_exts
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect();
        let loader_map = config
            .loader_map
            .iter()
            .map(|(ext, kind)| (normalize_extension(ext), *kind))
            .collect();
        tracing::debug!(
            supported = ?supported_exts,
            "Document ingestor initialized"
        );
        Self {
            supported_exts,
            loader_map,
        }
    }

    /// Load every path: directories are scanned, files loaded directly.
    ///
    /// Failures on individual paths are logged and skipped; missing paths produce a warning.
    pub fn load_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<Document> {
        let mut documents = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let loaded = if path.is_dir() {
                self.load_directory(path)
            } else if path.is_file() {
                self.load_file(path)
            } else {
                tracing::warn!(path = %path.display(), "Path not found; skipping");
                continue;
            };
            match loaded {
                Ok(docs) => documents.extend(docs),
                Err(error) => {
                    tracing::error!(path = %path.display(), %error, "Failed to load path");
                }
            }
        }
        if documents.is_empty() && !paths.is_empty() {
            tracing::warn!("No supported documents found in the provided paths");
        }
        documents
    }

    /// Recursively load every supported file under `directory`, in file-name order.
    pub fn load_directory(&self, directory: &Path) -> Result<Vec<Document>, IngestionError> {
        if !directory.is_dir() {
            return Err(IngestionError::DirectoryNotFound(directory.to_path_buf()));
        }
        let mut documents = Vec::new();
        let walker = WalkDir::new(directory)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file());
        for entry in walker {
            let path = entry.path();
            let extension = extension_of(path);
            if !self.supported_exts.contains(&extension) {
                tracing::info!(path = %path.display(), "Skipped unsupported file type");
                continue;
            }
            match self.load_file(path) {
                Ok(docs) => {
                    tracing::info!(path = %path.display(), docs = docs.len(), "File ingested");
                    documents.extend(docs);
                }
                Err(error) => {
                    tracing::error!(path = %path.display(), %error, "File skipped due to error");
                }
            }
        }
        if documents.is_empty() {
            tracing::warn!(directory = %directory.display(), "No supported documents found in directory");
        }
        Ok(documents)
    }

    /// Load a single file with the loader mapped to its extension.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Document>, IngestionError> {
        let extension = extension_of(path);
        let kind = if SQLITE_EXTENSIONS.contains(&extension.as_str()) {
            LoaderKind::Sqlite
        } else {
            *self
                .loader_map
                .get(&extension)
                .ok_or_else(|| IngestionError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    extension: extension.clone(),
                })?
        };
        let source = normalized_source(path);

        let content = match kind {
            LoaderKind::Sqlite => return sqlite::load_tables(path, &source),
            LoaderKind::Text | LoaderKind::Markdown | LoaderKind::Csv => {
                String::from_utf8_lossy(&read_bytes(path)?).into_owned()
            }
            LoaderKind::Json => json_text(&read_bytes(path)?),
            LoaderKind::Pdf => extract::pdf_text(&read_bytes(path)?)?,
            LoaderKind::Docx => extract::docx_text(&read_bytes(path)?)?,
            LoaderKind::Pptx => extract::pptx_text(&read_bytes(path)?)?,
            LoaderKind::Xlsx => extract::xlsx_text(&read_bytes(path)?)?,
        };
        Ok(vec![Document::new(content, source)])
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, IngestionError> {
    std::fs::read(path).map_err(|source| IngestionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn json_text(bytes: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned()),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn normalize_extension(ext: &str) -> String {
    let lower = ext.trim().to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Absolute, symlink-resolved path when possible, otherwise the absolute form of the input.
fn normalized_source(path: &Path) -> String {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
