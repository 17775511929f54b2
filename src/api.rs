//! HTTP surface for docsage.
//!
//! This module exposes a compact Axum router over [`PipelineApi`]:
//!
//! - `POST /analysis` – Summarize documents (map-reduce) and store the result on a session.
//! - `POST /comparison` – Compare document set A against set B, holistically or chunk by chunk.
//! - `POST /chat/sessions` – Open a chat session, optionally indexing documents.
//! - `POST /chat/sessions/:id/documents` – Replace the documents a chat session answers from.
//! - `POST /chat/sessions/:id/query` – Ask a question within a session.
//! - `DELETE /chat/sessions/:id` – End a session.
//! - `POST /prompts/reload` – Re-read the prompt catalog.
//! - `GET /metrics` – Pipeline counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Failures are returned as `{ "success": false, "message": ... }`.

use crate::pipeline::{PipelineError, QaResponse};
use crate::service::{
    AnalysisOutcome, AnalysisRequest, ChatSession, ComparisonOutcome, ComparisonRequest,
    PipelineApi, ServiceError,
};
use crate::session::SessionError;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Build the HTTP router exposing the pipeline API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route("/analysis", post(run_analysis::<S>))
        .route("/comparison", post(run_comparison::<S>))
        .route("/chat/sessions", post(start_chat::<S>))
        .route("/chat/sessions/:id", delete(end_chat::<S>))
        .route("/chat/sessions/:id/documents", post(ingest_documents::<S>))
        .route("/chat/sessions/:id/query", post(query::<S>))
        .route("/prompts/reload", post(reload_prompts::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

async fn run_analysis<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<AnalysisOutcome>, AppError>
where
    S: PipelineApi,
{
    let outcome = service.run_analysis(request).await?;
    tracing::info!(
        session_id = %outcome.session_id,
        chunks = outcome.result.chunk_count,
        fallback_chunks = outcome.result.fallback_chunks,
        "Analysis request completed"
    );
    Ok(Json(outcome))
}

async fn run_comparison<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ComparisonRequest>,
) -> Result<Json<ComparisonOutcome>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.run_comparison(request).await?))
}

/// Request body for opening a session or replacing its documents.
#[derive(Default, Deserialize)]
struct DocumentsRequest {
    #[serde(default)]
    paths: Vec<PathBuf>,
}

async fn start_chat<S>(
    State(service): State<Arc<S>>,
    request: Option<Json<DocumentsRequest>>,
) -> Result<(StatusCode, Json<ChatSession>), AppError>
where
    S: PipelineApi,
{
    let Json(request) = request.unwrap_or_default();
    let session = service.start_chat(request.paths).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn ingest_documents<S>(
    State(service): State<Arc<S>>,
    Path(session_id): Path<String>,
    Json(request): Json<DocumentsRequest>,
) -> Result<Json<ChatSession>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(
        service
            .ingest_chat_documents(&session_id, request.paths)
            .await?,
    ))
}

/// Request body for `POST /chat/sessions/:id/query`.
#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

/// Chat answer tagged with its session.
#[derive(Serialize)]
struct QueryResponse {
    session_id: String,
    #[serde(flatten)]
    response: QaResponse,
}

async fn query<S>(
    State(service): State<Arc<S>>,
    Path(session_id): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError>
where
    S: PipelineApi,
{
    let response = service.query(&session_id, &request.question).await?;
    Ok(Json(QueryResponse {
        session_id,
        response,
    }))
}

/// Response body for `DELETE /chat/sessions/:id`.
#[derive(Serialize)]
struct EndChatResponse {
    session_id: String,
    ended: bool,
    turns: usize,
}

async fn end_chat<S>(
    State(service): State<Arc<S>>,
    Path(session_id): Path<String>,
) -> Result<Json<EndChatResponse>, AppError>
where
    S: PipelineApi,
{
    let record = service.end_chat(&session_id).await?;
    Ok(Json(EndChatResponse {
        session_id: record.session_id,
        ended: record.ended,
        turns: record.conversation.len(),
    }))
}

async fn reload_prompts<S>(
    State(service): State<Arc<S>>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: PipelineApi,
{
    let prompts = service.reload_prompts().await?;
    Ok(Json(json!({ "success": true, "prompts": prompts })))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> impl IntoResponse
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "analysis",
                method: "POST",
                path: "/analysis",
                description: "Summarize documents chunk by chunk, combine the summaries, and optionally extract keywords.",
                request_example: Some(json!({
                    "paths": ["data/reports/q3.pdf"],
                    "session_id": null
                })),
            },
            CommandDescriptor {
                name: "comparison",
                method: "POST",
                path: "/comparison",
                description: "Compare document set A with document set B. Strategy is holistic_compare or compare_docs.",
                request_example: Some(json!({
                    "paths_a": ["data/contracts/v1.docx"],
                    "paths_b": ["data/contracts/v2.docx"],
                    "strategy": "compare_docs"
                })),
            },
            CommandDescriptor {
                name: "start_chat",
                method: "POST",
                path: "/chat/sessions",
                description: "Open a chat session over the given documents (or the default chat directory).",
                request_example: Some(json!({ "paths": ["data/manuals"] })),
            },
            CommandDescriptor {
                name: "ingest_chat_documents",
                method: "POST",
                path: "/chat/sessions/:id/documents",
                description: "Replace the documents a chat session answers from.",
                request_example: Some(json!({ "paths": ["data/manuals/router.pdf"] })),
            },
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/chat/sessions/:id/query",
                description: "Ask a question; follow-ups are rewritten against the session history before retrieval.",
                request_example: Some(json!({ "question": "How do I reset the device?" })),
            },
            CommandDescriptor {
                name: "end_chat",
                method: "DELETE",
                path: "/chat/sessions/:id",
                description: "End a chat session.",
                request_example: None,
            },
            CommandDescriptor {
                name: "reload_prompts",
                method: "POST",
                path: "/prompts/reload",
                description: "Re-read the prompt catalog without restarting.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return pipeline counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

struct AppError(ServiceError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Session(SessionError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Session(SessionError::Ended { .. }) => StatusCode::CONFLICT,
            ServiceError::Pipeline(
                PipelineError::EmptyInput { .. }
                | PipelineError::EmptyChunks { .. }
                | PipelineError::EmptyText { .. }
                | PipelineError::MissingInput { .. }
                | PipelineError::InvalidStrategy(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = json!({ "success": false, "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}
