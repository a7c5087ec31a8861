//! HTTP API — the external surface of the assistant.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`                        — run a turn, get the final answer
//! - `POST /v1/chat/stream`                 — run a turn, stream events over SSE
//! - `GET  /v1/conversations/{id}/events`   — attach a live subscriber to a conversation
//! - `GET  /v1/tools`                       — list available tools
//! - `GET  /v1/status`                      — health/uptime

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use vitalis_agent::{TurnMessage, TurnState};
use vitalis_core::conversation::{ConversationId, Role};
use vitalis_core::tool::ToolRegistry;

use crate::multiplexer::StreamMultiplexer;
use crate::runner::TurnRunner;

/// Maximum number of in-memory conversation histories kept; starting a
/// turn beyond this evicts another conversation's history first.
const MAX_CONVERSATIONS: usize = 1_000;

/// Shared state for the API.
pub struct AppState {
    pub runner: Arc<TurnRunner>,
    pub multiplexer: Arc<StreamMultiplexer>,
    pub tools: Arc<ToolRegistry>,
    pub start_time: chrono::DateTime<chrono::Utc>,
    history: Mutex<HashMap<ConversationId, Vec<TurnMessage>>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        runner: Arc<TurnRunner>,
        multiplexer: Arc<StreamMultiplexer>,
        tools: Arc<ToolRegistry>,
    ) -> SharedState {
        Arc::new(Self {
            runner,
            multiplexer,
            tools,
            start_time: chrono::Utc::now(),
            history: Mutex::new(HashMap::new()),
        })
    }

    /// Append the user message and return the full history for the turn.
    fn begin_turn(&self, id: &ConversationId, user_message: &str) -> Vec<TurnMessage> {
        let mut history = self.history.lock().unwrap();
        if history.len() >= MAX_CONVERSATIONS && !history.contains_key(id) {
            if let Some(oldest) = history.keys().next().cloned() {
                history.remove(&oldest);
            }
        }
        let messages = history.entry(id.clone()).or_default();
        messages.push(TurnMessage {
            role: Role::User,
            content: user_message.to_string(),
        });
        messages.clone()
    }

    /// Record the assistant's reply in the history.
    fn record_reply(&self, id: &ConversationId, reply: &str) {
        if reply.is_empty() {
            return;
        }
        let mut history = self.history.lock().unwrap();
        if let Some(messages) = history.get_mut(id) {
            messages.push(TurnMessage {
                role: Role::Assistant,
                content: reply.to_string(),
            });
        }
    }
}

/// Build the v1 API router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat_handler))
        .route("/v1/chat/stream", post(chat_stream_handler))
        .route("/v1/conversations/{id}/events", get(events_handler))
        .route("/v1/tools", get(list_tools_handler))
        .route("/v1/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    /// Existing conversation ID (omit to create new).
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default = "default_user_id")]
    user_id: String,
    /// The user's message.
    message: String,
}

fn default_user_id() -> String {
    "anonymous".into()
}

#[derive(Serialize)]
struct ChatResponse {
    conversation_id: String,
    state: &'static str,
    response: String,
    iterations: u32,
    tools_used: Vec<String>,
}

#[derive(Serialize)]
struct ToolDto {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDto>,
    count: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
    subscribers: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn state_name(state: TurnState) -> &'static str {
    match state {
        TurnState::Running => "running",
        TurnState::WaitingForUser => "waiting_for_user",
        TurnState::Finished => "finished",
        TurnState::Fallback => "fallback",
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "message must not be empty".into(),
            }),
        ));
    }

    let conversation_id = payload
        .conversation_id
        .map(|id| ConversationId::from(&id))
        .unwrap_or_default();
    info!(conversation = %conversation_id, "v1/chat request");

    let messages = state.begin_turn(&conversation_id, &payload.message);
    let outcome = state
        .runner
        .run(conversation_id.clone(), &payload.user_id, messages)
        .await;

    let response = outcome
        .answer
        .clone()
        .or_else(|| outcome.fallback_response.clone())
        .unwrap_or_default();
    state.record_reply(&conversation_id, &response);

    Ok(Json(ChatResponse {
        conversation_id: conversation_id.to_string(),
        state: state_name(outcome.state),
        response,
        iterations: outcome.iterations,
        tools_used: outcome.tools_used,
    }))
}

/// `POST /v1/chat/stream` — run the turn in the background and stream its
/// events over SSE through the multiplexer.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<
    Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>,
    (StatusCode, Json<ErrorResponse>),
> {
    if payload.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "message must not be empty".into(),
            }),
        ));
    }

    let conversation_id = payload
        .conversation_id
        .map(|id| ConversationId::from(&id))
        .unwrap_or_default();
    info!(conversation = %conversation_id, "v1/chat/stream request");

    // Attach the subscriber before the turn starts so no event is missed.
    let (_, frames) = state.multiplexer.subscribe(conversation_id.clone());

    let messages = state.begin_turn(&conversation_id, &payload.message);
    let task_state = state.clone();
    let task_conversation = conversation_id.clone();
    tokio::spawn(async move {
        let outcome = task_state
            .runner
            .run(task_conversation.clone(), &payload.user_id, messages)
            .await;
        let response = outcome
            .answer
            .or(outcome.fallback_response)
            .unwrap_or_default();
        task_state.record_reply(&task_conversation, &response);
    });

    let stream = UnboundedReceiverStream::new(frames)
        .map(|frame| Ok(SseEvent::default().event(frame.event).data(frame.data)));
    Ok(Sse::new(stream))
}

/// `GET /v1/conversations/{id}/events` — attach a live subscriber to an
/// existing conversation.
async fn events_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let conversation_id = ConversationId::from(&id);
    let (subscriber_id, frames) = state.multiplexer.subscribe(conversation_id);
    info!(subscriber = %subscriber_id, conversation = %id, "live subscriber attached");

    let stream = UnboundedReceiverStream::new(frames)
        .map(|frame| Ok(SseEvent::default().event(frame.event).data(frame.data)));
    Sse::new(stream)
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolDto> = state
        .tools
        .definitions()
        .into_iter()
        .map(|d| ToolDto {
            name: d.name,
            description: d.description,
            parameters: d.parameters,
        })
        .collect();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        subscribers: state.multiplexer.subscriber_count(),
    })
}
