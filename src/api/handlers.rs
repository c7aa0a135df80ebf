//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ConversationListResponse, ConversationResponse, ErrorResponse, LoadRequest,
    RegenerateRequest, SendMessageRequest, SettingsRequest, SuccessResponse,
};
use super::AppState;
use crate::conversation::ConversationSummary;
use crate::error::ChatError;
use crate::session::{SessionError, SessionView};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Live session
        .route("/api/session", get(get_session))
        .route("/api/session/stream", get(stream_session))
        .route("/api/session/messages", post(send_message))
        .route("/api/session/stop", post(stop))
        .route("/api/session/regenerate", post(regenerate))
        .route("/api/session/clear", post(clear))
        .route("/api/session/load", post(load))
        .route("/api/session/settings", axum::routing::put(update_settings))
        // History
        .route("/api/conversations", get(list_conversations))
        .route(
            "/api/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Session
// ============================================================

async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session.view())
}

async fn stream_session(State(state): State<AppState>) -> impl IntoResponse {
    sse_stream(state.session.subscribe())
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SessionView>, AppError> {
    if req.content.is_empty() {
        return Err(AppError::BadRequest("Message has no content".to_string()));
    }
    let truncate_at = req
        .truncate_at
        .unwrap_or_else(|| state.session.view().messages.len());
    state.session.send_message(truncate_at, req.into_message())?;
    Ok(Json(state.session.view()))
}

async fn stop(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.session.stop();
    Json(SuccessResponse::ok())
}

async fn regenerate(
    State(state): State<AppState>,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<SessionView>, AppError> {
    state.session.regenerate(req.index)?;
    Ok(Json(state.session.view()))
}

async fn clear(State(state): State<AppState>) -> Json<SessionView> {
    state.session.clear().await;
    Json(state.session.view())
}

async fn load(
    State(state): State<AppState>,
    Json(req): Json<LoadRequest>,
) -> Result<Json<SessionView>, AppError> {
    match state.session.load_conversation(&req.id).await? {
        Some(_) => Ok(Json(state.session.view())),
        None => Err(AppError::NotFound(format!("Conversation not found: {}", req.id))),
    }
}

async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<SettingsRequest>,
) -> Json<SessionView> {
    if let Some(model) = req.model {
        state.session.set_model(model);
    }
    if let Some(prompt) = req.system_prompt {
        state.session.set_system_prompt(prompt);
    }
    if let Some(enabled) = req.enable_search {
        state.session.set_enable_search(enabled);
    }
    Json(state.session.view())
}

// ============================================================
// History
// ============================================================

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<ConversationListResponse>, AppError> {
    let records = state.store.get_all().await.map_err(ChatError::from)?;
    Ok(Json(ConversationListResponse {
        conversations: records.iter().map(ConversationSummary::from).collect(),
    }))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation = state
        .store
        .get(&id)
        .await
        .map_err(ChatError::from)?
        .ok_or_else(|| AppError::NotFound(format!("Conversation not found: {id}")))?;
    Ok(Json(ConversationResponse { conversation }))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    // Stop writing to the row before it goes away
    if state.session.view().conversation_id.as_deref() == Some(id.as_str()) {
        state.session.clear().await;
    }
    state.store.delete(&id).await.map_err(ChatError::from)?;
    tracing::info!(conv_id = %id, "Deleted conversation");
    Ok(Json(SuccessResponse::ok()))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("streamchat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Busy => AppError::Conflict(err.to_string()),
            SessionError::InvalidRegenerate(_) | SessionError::InvalidMessage => {
                AppError::BadRequest(err.to_string())
            }
            SessionError::Store(e) => e.into(),
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        tracing::error!(error = %err, kind = ?err.kind(), "Request failed");
        AppError::Internal(err.user_message())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
