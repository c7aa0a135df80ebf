//! HTTP API for the chat session and its history

mod handlers;
mod sse;
mod types;


pub use handlers::create_router;

use crate::db::ConversationStore;
use crate::session::ChatSession;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: ChatSession,
    pub store: Arc<dyn ConversationStore>,
}

impl AppState {
    pub fn new(session: ChatSession, store: Arc<dyn ConversationStore>) -> Self {
        Self { session, store }
    }
}
