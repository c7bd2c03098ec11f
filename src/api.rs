//! REST API server for the banking assistant
//!
//! Thin transport adapter over the chatbot: one chat endpoint (plus an
//! IVR variant), prompt injection, and session teardown. Session ids are
//! generated server-side when omitted.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::chatbot::BankingChatbot;
use crate::models::Channel;

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    pub caller_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct IvrChatQuery {
    pub message: String,
    pub session_id: Option<String>,
    pub cli: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InjectPromptRequest {
    pub session_id: String,
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub chatbot: Arc<BankingChatbot>,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(session_id = session_id.as_str(), "Chat request");

    let response = state
        .chatbot
        .process_message(
            &session_id,
            &request.message,
            request.caller_id.as_deref(),
            Channel::Web,
        )
        .await;

    Json(ChatResponse {
        response,
        session_id,
    })
}

/// IVR variant: the caller id arrives as a header or the `cli` query
/// parameter, and sessions get an `ivr_` prefix.
async fn ivr_chat(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<IvrChatQuery>,
) -> Json<ChatResponse> {
    let session_id = query
        .session_id
        .unwrap_or_else(|| format!("ivr_{}", Uuid::new_v4()));

    let caller_id = headers
        .get("caller-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or(query.cli);

    info!(
        session_id = session_id.as_str(),
        caller = caller_id.as_deref().unwrap_or("unknown"),
        "IVR chat request"
    );

    let response = state
        .chatbot
        .process_message(
            &session_id,
            &query.message,
            caller_id.as_deref(),
            Channel::Ivr,
        )
        .await;

    Json(ChatResponse {
        response,
        session_id,
    })
}

async fn inject_prompt(
    State(state): State<ApiState>,
    Json(request): Json<InjectPromptRequest>,
) -> Json<SuccessResponse> {
    let success = state
        .chatbot
        .inject_prompt(&request.session_id, &request.prompt)
        .await;
    Json(SuccessResponse { success })
}

async fn end_session(
    State(state): State<ApiState>,
    Json(request): Json<EndSessionRequest>,
) -> Json<SuccessResponse> {
    let success = state.chatbot.end_session(&request.session_id).await;
    Json(SuccessResponse { success })
}

/// =============================
/// Router
/// =============================

pub fn create_router(chatbot: Arc<BankingChatbot>) -> Router {
    let state = ApiState { chatbot };

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/ivr/chat", post(ivr_chat))
        .route("/inject_prompt", post(inject_prompt))
        .route("/end_session", post(end_session))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    chatbot: Arc<BankingChatbot>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(chatbot);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("Banking assistant listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
