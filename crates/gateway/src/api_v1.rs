//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST   /v1/chat/stream`             — Submit a query, receive an SSE stream
//! - `POST   /v1/chat/{query_id}/cancel`  — Cancel an in-flight query
//! - `POST   /v1/documents`               — Ingest inline documents and/or named files
//! - `DELETE /v1/documents`               — Remove sources from the index
//! - `POST   /v1/documents/ingest-all`    — Ingest every file in the documents directory
//! - `GET    /v1/documents/summary`       — Chunk counts per source
//! - `GET    /v1/tools`                   — List available tools

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docent_agent::ChatPipeline;
use docent_core::document::{Document, SourceSummary};
use docent_core::message::{ConversationId, Message, Query};
use docent_core::tool::ToolRegistry;
use docent_index::{IngestError, IngestReport, Ingestor, validate_source_name};

/// Response header carrying the id to cancel a streaming query with.
pub const QUERY_ID_HEADER: &str = "x-query-id";

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub pipeline: ChatPipeline,
    pub ingestor: Arc<Ingestor>,
    pub tools: Arc<ToolRegistry>,
    /// Directory that document `names` resolve against
    pub docs_dir: PathBuf,
    active: Mutex<HashMap<String, CancellationToken>>,
}

pub type SharedApiState = Arc<ApiV1State>;

impl ApiV1State {
    pub fn new(
        pipeline: ChatPipeline,
        ingestor: Arc<Ingestor>,
        tools: Arc<ToolRegistry>,
        docs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pipeline,
            ingestor,
            tools,
            docs_dir: docs_dir.into(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Number of queries currently streaming.
    pub fn active_queries(&self) -> usize {
        self.active().len()
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a new query. `None` if the id is already in flight.
    fn register(&self, query_id: &str) -> Option<CancellationToken> {
        let mut active = self.active();
        if active.contains_key(query_id) {
            return None;
        }
        let token = CancellationToken::new();
        active.insert(query_id.to_string(), token.clone());
        Some(token)
    }

    fn cancel(&self, query_id: &str) -> bool {
        match self.active().get(query_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn release(&self, query_id: &str) {
        self.active().remove(query_id);
    }
}

/// Untracks its query once the response body is dropped, whether the
/// stream completed or the client went away.
struct ActiveQuery {
    state: SharedApiState,
    query_id: String,
}

impl Drop for ActiveQuery {
    fn drop(&mut self) {
        self.state.release(&self.query_id);
    }
}

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat/stream", post(chat_stream_handler))
        .route("/chat/{query_id}/cancel", post(cancel_handler))
        .route(
            "/documents",
            post(ingest_documents_handler).delete(delete_documents_handler),
        )
        .route("/documents/ingest-all", post(ingest_all_handler))
        .route("/documents/summary", get(summary_handler))
        .route("/tools", get(list_tools_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    /// Caller-chosen id; generated when omitted
    #[serde(default)]
    query_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    /// Prior turns, oldest first
    #[serde(default)]
    history: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            missing: Vec::new(),
        }),
    )
}

fn ingest_error(e: IngestError) -> ApiError {
    let status = match &e {
        IngestError::NotFound(_) => StatusCode::NOT_FOUND,
        IngestError::InvalidName(_) => StatusCode::BAD_REQUEST,
        IngestError::Embedding(_) => StatusCode::SERVICE_UNAVAILABLE,
        IngestError::Index(_) | IngestError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let error = e.to_string();
    let missing = match e {
        IngestError::NotFound(names) => names,
        _ => Vec::new(),
    };
    (status, Json(ErrorResponse { error, missing }))
}

#[derive(Serialize, Deserialize)]
struct CancelResponse {
    query_id: String,
    cancelled: bool,
}

#[derive(Deserialize)]
struct IngestRequest {
    #[serde(default)]
    documents: Vec<Document>,
    /// File names inside the documents directory
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct IngestResponse {
    sources: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<String>,
    total_chunks: usize,
}

impl From<IngestReport> for IngestResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            total_chunks: report.total_chunks(),
            sources: report.sources,
            skipped: report.skipped,
        }
    }
}

#[derive(Deserialize)]
struct DeleteRequest {
    names: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct DeleteResponse {
    deleted: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    missing: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct SummaryResponse {
    sources: Vec<SourceSummary>,
    total_chunks: usize,
}

#[derive(Serialize, Deserialize)]
struct ToolListResponse {
    tools: Vec<ToolDto>,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct ToolDto {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// `POST /v1/chat/stream` — Submit a query, receive an SSE stream of increments.
///
/// Each SSE event is named after the increment type and carries its sequence
/// number as the event id. Closing the connection cancels the query.
async fn chat_stream_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let mut query = Query::new(payload.message).with_history(payload.history);
    if let Some(id) = payload.query_id {
        query.id = id;
    }
    if let Some(conversation_id) = payload.conversation_id {
        query = query.in_conversation(ConversationId(conversation_id));
    }
    let query_id = query.id.clone();

    let Some(cancel) = state.register(&query_id) else {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("query {query_id} is already running"),
        ));
    };
    info!(query_id = %query_id, history = query.history.len(), "v1/chat/stream request");

    let active = ActiveQuery {
        state: Arc::clone(&state),
        query_id: query_id.clone(),
    };
    let stream = state
        .pipeline
        .submit_with_cancel(query, cancel)
        .map(move |increment| {
            let _active = &active;
            let data = serde_json::to_string(&increment).unwrap_or_default();
            Ok::<_, Infallible>(
                SseEvent::default()
                    .event(increment.event.event_type())
                    .id(increment.seq.to_string())
                    .data(data),
            )
        });

    Ok((
        [(QUERY_ID_HEADER, query_id)],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

/// `POST /v1/chat/{query_id}/cancel`
async fn cancel_handler(
    State(state): State<SharedApiState>,
    Path(query_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    if !state.cancel(&query_id) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no active query {query_id}"),
        ));
    }
    info!(query_id = %query_id, "Query cancelled by client");
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            query_id,
            cancelled: true,
        }),
    ))
}

// ── Documents ─────────────────────────────────────────────────────────────

async fn ingest_documents_handler(
    State(state): State<SharedApiState>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    if req.documents.is_empty() && req.names.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "nothing to ingest: provide documents or names",
        ));
    }
    for document in &req.documents {
        validate_source_name(&document.source).map_err(ingest_error)?;
    }

    let mut report = if req.names.is_empty() {
        IngestReport::default()
    } else {
        state
            .ingestor
            .ingest_files(&state.docs_dir, &req.names)
            .await
            .map_err(ingest_error)?
    };
    for document in &req.documents {
        let count = state.ingestor.ingest(document).await.map_err(ingest_error)?;
        report.sources.insert(document.source.clone(), count);
    }

    info!(
        sources = report.sources.len(),
        chunks = report.total_chunks(),
        "Documents ingested"
    );
    Ok((StatusCode::CREATED, Json(report.into())))
}

async fn ingest_all_handler(
    State(state): State<SharedApiState>,
) -> Result<Json<IngestResponse>, ApiError> {
    if !state.docs_dir.is_dir() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("documents directory {} not found", state.docs_dir.display()),
        ));
    }
    let report = state
        .ingestor
        .ingest_dir(&state.docs_dir)
        .await
        .map_err(ingest_error)?;
    info!(
        sources = report.sources.len(),
        chunks = report.total_chunks(),
        skipped = report.skipped.len(),
        "Documents directory ingested"
    );
    Ok(Json(report.into()))
}

/// `DELETE /v1/documents` — 404 when any name had nothing indexed; the
/// other names are still removed.
async fn delete_documents_handler(
    State(state): State<SharedApiState>,
    Json(req): Json<DeleteRequest>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    if req.names.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "names must not be empty"));
    }
    let deleted = state
        .ingestor
        .delete_sources(&req.names)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let missing: Vec<String> = deleted
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| name.clone())
        .collect();
    let status = if missing.is_empty() {
        StatusCode::OK
    } else {
        warn!(missing = ?missing, "Delete requested for sources that are not indexed");
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(DeleteResponse { deleted, missing })))
}

async fn summary_handler(
    State(state): State<SharedApiState>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let sources = state
        .ingestor
        .index()
        .summary()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let total_chunks = sources.iter().map(|s| s.chunks).sum();
    Ok(Json(SummaryResponse {
        sources,
        total_chunks,
    }))
}

// ── Tools ─────────────────────────────────────────────────────────────────

async fn list_tools_handler(State(state): State<SharedApiState>) -> Json<ToolListResponse> {
    let defs = state.tools.definitions();
    let count = defs.len();

    Json(ToolListResponse {
        tools: defs
            .into_iter()
            .map(|d| ToolDto {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
        count,
    })
}
