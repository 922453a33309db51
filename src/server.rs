use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::bedrock::{AwsCredentials, BedrockKnowledgeBase};
use crate::citation::Reference;
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::page;
use crate::rate_limit::rate_limit_middleware;
use crate::session::{ChatTurn, Conversation, ConversationStore, ConversationSummary};

/// Largest accepted request body.
const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// How often idle conversations are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shown to the user when the knowledge base call fails; the cause is logged.
const RETRIEVAL_FAILED: &str =
    "The knowledge base could not answer this question right now. Please try again.";

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    info!(
        name: "bedrock.config.loaded",
        region = %config.bedrock.aws_region,
        kb_id = %config.bedrock.kb_id,
        model = %config.bedrock.inference_model_id,
        guardrails = config.bedrock.enable_guardrails,
        "Knowledge base configuration loaded"
    );

    let credentials = AwsCredentials::from_env()?;
    let client = BedrockKnowledgeBase::new(&config.bedrock, credentials)?;
    info!(endpoint = %client.endpoint(), "Knowledge base client ready");

    let state = AppState::new(Arc::clone(&config), Arc::new(client));
    spawn_conversation_sweeper(
        state.conversations.clone(),
        Duration::from_secs(config.server.conversation_ttl_secs),
    );

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Routes and middleware, without binding a socket.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(api_chat))
        .route(
            "/api/conversations",
            get(api_list_conversations).post(api_create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            axum::routing::delete(api_delete_conversation),
        )
        .route("/api/conversations/{id}/clear", post(api_clear_conversation))
        .route("/api/conversations/{id}/name", put(api_rename_conversation))
        .route("/api/conversations/{id}/turns", get(api_get_turns))
        .route(
            "/api/conversations/{id}/prompts",
            get(api_get_prompts).put(api_update_prompts),
        )
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

fn spawn_conversation_sweeper(store: ConversationStore, ttl: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = store.cleanup_expired_with_timeout(ttl);
            if removed > 0 {
                info!(
                    name: "conversations.expired",
                    removed,
                    remaining = store.len(),
                    "Expired idle conversations"
                );
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET / - Chat page.
async fn index_handler() -> impl IntoResponse {
    Html(page::chat_page())
}

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User question.
    message: String,
    /// Conversation to continue (creates new if not provided).
    #[serde(default)]
    conversation_id: Option<Uuid>,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
struct ChatResponse {
    conversation_id: Uuid,
    /// Knowledge base session now in effect.
    session_id: Option<String>,
    /// Display text with citation markers.
    text: String,
    references: Vec<Reference>,
    /// Id of the stored assistant turn.
    unique_id: Uuid,
}

/// POST /api/chat - Ask a question and wait for the annotated answer.
async fn api_chat(
    State(app): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message must not be empty".to_string()));
    }

    let conversation = match req.conversation_id {
        Some(id) => app.conversations.get_or_create(id),
        None => app.conversations.create(),
    };

    tracing::info!(
        conversation_id = %conversation.id(),
        message_length = req.message.len(),
        "Received chat request"
    );

    let turn = conversation
        .ask(app.client.as_ref(), &app.config.bedrock, &req.message)
        .await
        .map_err(|e| match e {
            ChatError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            other => {
                tracing::error!(
                    name: "chat.turn.failed",
                    conversation_id = %conversation.id(),
                    error = %other,
                    "Chat turn failed"
                );
                (StatusCode::BAD_GATEWAY, RETRIEVAL_FAILED.to_string())
            }
        })?;

    Ok(Json(ChatResponse {
        conversation_id: conversation.id(),
        session_id: turn.session_id,
        text: turn.text,
        references: turn.references,
        unique_id: turn.unique_id,
    }))
}

/// GET /api/conversations - List conversations, oldest first. Does not wait
/// for turns in flight.
async fn api_list_conversations(State(app): State<AppState>) -> Json<Vec<ConversationSummary>> {
    Json(
        app.conversations
            .list()
            .iter()
            .map(Conversation::summary)
            .collect(),
    )
}

/// POST /api/conversations - Start an empty conversation.
async fn api_create_conversation(
    State(app): State<AppState>,
) -> (StatusCode, Json<ConversationSummary>) {
    let conversation = app.conversations.create();
    (StatusCode::CREATED, Json(conversation.summary()))
}

/// DELETE /api/conversations/{id} - Drop a conversation entirely.
async fn api_delete_conversation(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    match app.conversations.remove(&id) {
        Some(_) => {
            info!(conversation_id = %id, "Conversation deleted");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// POST /api/conversations/{id}/clear - Clear chat: history, session and
/// name are reset, the conversation and its prompts stay.
async fn api_clear_conversation(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationSummary>, StatusCode> {
    let conversation = app.conversations.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    conversation.clear().await;
    info!(conversation_id = %id, "Conversation cleared");
    Ok(Json(conversation.summary()))
}

/// New display name.
#[derive(Debug, Deserialize)]
struct RenameRequest {
    name: String,
}

/// PUT /api/conversations/{id}/name
async fn api_rename_conversation(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<ConversationSummary>, (StatusCode, String)> {
    let conversation = app
        .conversations
        .get(&id)
        .ok_or((StatusCode::NOT_FOUND, "conversation not found".to_string()))?;
    let name = conversation
        .rename(&req.name)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    info!(conversation_id = %id, name = %name, "Conversation renamed");
    Ok(Json(conversation.summary()))
}

/// GET /api/conversations/{id}/turns - Transcript.
async fn api_get_turns(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ChatTurn>>, StatusCode> {
    let conversation = app.conversations.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    let turns = conversation.lock().await.turns.clone();
    Ok(Json(turns))
}

/// Prompt templates of one conversation.
#[derive(Debug, Serialize)]
struct PromptsDto {
    generation_prompt: String,
    orchestration_prompt: String,
}

/// Partial prompt update; omitted fields are left unchanged.
#[derive(Debug, Deserialize)]
struct PromptsUpdate {
    #[serde(default)]
    generation_prompt: Option<String>,
    #[serde(default)]
    orchestration_prompt: Option<String>,
}

/// GET /api/conversations/{id}/prompts
async fn api_get_prompts(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PromptsDto>, StatusCode> {
    let conversation = app.conversations.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    let state = conversation.lock().await;
    Ok(Json(PromptsDto {
        generation_prompt: state.generation_prompt.clone(),
        orchestration_prompt: state.orchestration_prompt.clone(),
    }))
}

/// PUT /api/conversations/{id}/prompts
async fn api_update_prompts(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<PromptsUpdate>,
) -> Result<Json<PromptsDto>, (StatusCode, String)> {
    for (field, value) in [
        ("generation_prompt", &update.generation_prompt),
        ("orchestration_prompt", &update.orchestration_prompt),
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err((StatusCode::BAD_REQUEST, format!("{field} must not be empty")));
        }
    }

    let conversation = app
        .conversations
        .get(&id)
        .ok_or((StatusCode::NOT_FOUND, "conversation not found".to_string()))?;
    let mut state = conversation.lock().await;
    if let Some(prompt) = update.generation_prompt {
        state.generation_prompt = prompt;
    }
    if let Some(prompt) = update.orchestration_prompt {
        state.orchestration_prompt = prompt;
    }

    info!(conversation_id = %id, "Prompts updated");
    Ok(Json(PromptsDto {
        generation_prompt: state.generation_prompt.clone(),
        orchestration_prompt: state.orchestration_prompt.clone(),
    }))
}
