//! streamchat - streaming chat backend
//!
//! Runs a single chat session against an OpenAI-compatible streaming
//! endpoint and keeps the conversation history in `SQLite`.

mod api;
mod config;
mod conversation;
mod db;
mod error;
mod llm;
mod retry;
mod session;
mod stream;
mod title_generator;

use api::{create_router, AppState};
use config::AppConfig;
use db::{ConversationStore, Database};
use llm::{ChatTransport, HttpTransport, LoggingTransport};
use session::ChatSession;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamchat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let store: Arc<dyn ConversationStore> = Arc::new(Database::open(&config.db_path)?);

    if config.transport.api_key.is_none() {
        tracing::warn!("No API key configured. Set STREAMCHAT_API_KEY or API_KEY.");
    }
    tracing::info!(endpoint = %config.transport.endpoint, model = %config.session.default_model, "Chat endpoint configured");
    let http: Arc<dyn ChatTransport> = Arc::new(HttpTransport::new(config.transport.clone())?);
    let transport: Arc<dyn ChatTransport> = Arc::new(LoggingTransport::new(http));

    let session = ChatSession::new(store.clone(), transport, config.session.clone());
    let state = AppState::new(session, store);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("streamchat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
