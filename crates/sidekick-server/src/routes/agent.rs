use std::convert::Infallible;
use std::pin::Pin;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sidekick_core::{AgentError, ChatMessage, RunContext, TurnEvent};
use tokio_stream::{Stream, StreamExt, wrappers::UnboundedReceiverStream};
use tracing::instrument;

use crate::error::AppError;
use crate::state::{AppState, FeedbackRecord};

/// End-of-stream sentinel sent as a bare SSE data line.
const STREAM_SENTINEL: &str = "[DONE]";

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Opt-in to per-token events; message events arrive either way.
    #[serde(default)]
    pub stream_tokens: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub run_id: String,
    pub key: String,
    pub score: f64,
    #[serde(default)]
    pub kwargs: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<ChatMessage>,
}

pub fn agent_router() -> Router<AppState> {
    Router::new()
        .route("/invoke", post(invoke))
        .route("/stream", post(stream))
        .route("/feedback", post(feedback))
        .route("/history/:thread_id", get(history))
}

#[instrument(skip_all, fields(thread_id = payload.thread_id.as_deref().unwrap_or("new")))]
async fn invoke(
    State(state): State<AppState>,
    Json(payload): Json<InvokeRequest>,
) -> Result<Json<ChatMessage>, AppError> {
    if payload.message.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "message must not be empty",
        ));
    }

    let ctx = RunContext::new(payload.thread_id, payload.model);
    let reply = state.graph().invoke(&ctx, &payload.message).await?;
    Ok(Json(reply))
}

#[instrument(skip_all, fields(thread_id = payload.thread_id.as_deref().unwrap_or("new")))]
async fn stream(
    State(state): State<AppState>,
    Json(payload): Json<StreamRequest>,
) -> Result<Sse<SseStream>, AppError> {
    if payload.message.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "message must not be empty",
        ));
    }

    let ctx = RunContext::new(payload.thread_id, payload.model);
    let receiver = state
        .graph()
        .stream(ctx, payload.message, payload.stream_tokens);

    let stream = UnboundedReceiverStream::new(receiver)
        .map(|event| Ok::<Event, Infallible>(sse_event(event)));
    Ok(Sse::new(Box::pin(stream) as SseStream).keep_alive(KeepAlive::new()))
}

fn sse_event(event: TurnEvent) -> Event {
    match event {
        TurnEvent::End => Event::default().data(STREAM_SENTINEL),
        other => match serde_json::to_string(&other) {
            Ok(data) => Event::default().data(data),
            // Serialization failures are reported in-band, like any other
            // stream error.
            Err(err) => Event::default().data(
                serde_json::json!({
                    "type": "error",
                    "content": format!("failed to serialize event: {err}"),
                })
                .to_string(),
            ),
        },
    }
}

async fn feedback(
    State(state): State<AppState>,
    Json(payload): Json<FeedbackRequest>,
) -> Json<FeedbackResponse> {
    state.feedback().record(
        &payload.run_id,
        FeedbackRecord {
            key: payload.key,
            score: payload.score,
            kwargs: payload.kwargs,
        },
    );
    Json(FeedbackResponse { status: "success" })
}

async fn history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    match state.store().load(&thread_id).await? {
        Some(conversation) => Ok(Json(HistoryResponse {
            messages: conversation.messages,
        })),
        None => Err(AppError::from(AgentError::UnknownThread(thread_id))),
    }
}
