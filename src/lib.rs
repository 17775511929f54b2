#![deny(missing_docs)]

//! Core library for the docsage document analysis service.

/// HTTP routing and REST handlers.
pub mod api;
/// Layered TOML configuration registry.
pub mod config;
/// Document and chunk records.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// File loaders and directory ingestion.
pub mod ingest;
/// Chat model client abstraction and adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline activity counters.
pub mod metrics;
/// Model factory mapping configured names to clients.
pub mod models;
/// Analysis, comparison, and chat pipelines.
pub mod pipeline;
/// Text cleaning and chunking.
pub mod processing;
/// Prompt catalog and hot reload.
pub mod prompts;
/// Vector index and retrievers.
pub mod retrieval;
/// Service facade shared by the HTTP surface and the CLI.
pub mod service;
/// Conversation session storage.
pub mod session;
