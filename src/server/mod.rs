#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::chat::ChatService;
use crate::config::Config;
use crate::confluence::ConfluenceClient;
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::enrich::KeywordEnricher;
use crate::ingest::{ConfluenceSource, Ingestor};
use crate::llm::LlmClient;

const CHAT_ID_HEADER: &str = "chat-id";

/// Shared state behind the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    chat: ChatService,
    ingestor: Arc<Ingestor<ConfluenceSource>>,
    store: Arc<Mutex<VectorStore>>,
}

impl AppState {
    /// Wire up every component of the service from its configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        let llm = LlmClient::new(config)?;
        let memory = Database::initialize_at(&config.database_path()).await?;
        let store = Arc::new(Mutex::new(
            VectorStore::new(&config.vector_database_path()).await?,
        ));

        let confluence = ConfluenceClient::new(config)?;
        let source = ConfluenceSource::new(
            confluence,
            config.confluence.base_url.clone(),
            config.confluence.space_key.clone(),
        );
        let enricher = config
            .ingestion
            .enrich_keywords
            .then(|| KeywordEnricher::new(llm.clone(), config.ingestion.keyword_count));
        let ingestor = Arc::new(Ingestor::new(
            source,
            llm.clone(),
            enricher,
            config.chunking.clone(),
            config.ingestion.page_size,
        ));

        let chat = ChatService::new(llm, memory, Arc::clone(&store), config.chat.clone());

        Ok(Self {
            chat,
            ingestor,
            store,
        })
    }
}

/// Internal failure surfaced as a 500 with a terse body
struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = ?self.0, "Request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ChatParams {
    prompt: String,
    #[serde(rename = "chatId")]
    chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(rename = "chatId")]
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct EmbedParams {
    #[serde(rename = "documentId")]
    document_id: Option<String>,
}

/// Resolve the conversation id, generating one for a fresh conversation
fn resolve_chat_id(requested: Option<String>) -> (String, bool) {
    match requested {
        Some(id) if !id.is_empty() => (id, false),
        _ => (Uuid::new_v4().to_string(), true),
    }
}

fn attach_chat_id(mut response: Response, chat_id: &str, generated: bool) -> Response {
    if generated {
        if let Ok(value) = HeaderValue::from_str(chat_id) {
            response.headers_mut().insert(CHAT_ID_HEADER, value);
        }
    }
    response
}

async fn chat(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Result<Response, ApiError> {
    let (chat_id, generated) = resolve_chat_id(params.chat_id);

    let answer = state.chat.respond(&chat_id, &params.prompt).await?;
    let response = answer.unwrap_or_default().into_response();

    Ok(attach_chat_id(response, &chat_id, generated))
}

async fn streaming_chat(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Result<Response, ApiError> {
    let (chat_id, generated) = resolve_chat_id(params.chat_id);

    let stream = state
        .chat
        .respond_streaming(&chat_id, &params.prompt)
        .await?;
    let body = Body::from_stream(stream.map(|delta| match delta {
        Ok(text) => Ok(Bytes::from(text)),
        Err(e) => Err(axum::BoxError::from(e)),
    }));

    let response = Response::builder()
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(body)
        .context("Failed to build streaming response")?;

    Ok(attach_chat_id(response, &chat_id, generated))
}

async fn chat_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let history = state.chat.history(&params.chat_id).await?;
    Ok(axum::Json(history).into_response())
}

async fn embed_confluence(
    State(state): State<AppState>,
    Query(params): Query<EmbedParams>,
) -> Result<Response, ApiError> {
    let mut store = state.store.lock().await;

    // A blank documentId means the whole space
    let document_id = params.document_id.filter(|id| !id.is_empty());
    let report = match document_id {
        Some(document_id) => {
            let chunks = state
                .ingestor
                .ingest_document(&mut store, &document_id)
                .await?;
            json!({ "documents": 1, "chunks": chunks, "failures": 0 })
        }
        None => {
            let report = state.ingestor.ingest_all(&mut store).await?;
            json!({
                "documents": report.documents,
                "chunks": report.chunks,
                "failures": report.failures,
            })
        }
    };

    Ok(axum::Json(report).into_response())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/genAI/chat", get(chat))
        .route("/genAI/streaming-chat", get(streaming_chat))
        .route("/genAI/chat-history", get(chat_history))
        .route("/embed/confluence", get(embed_confluence))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router(state))
        .await
        .context("HTTP server failed")
}
