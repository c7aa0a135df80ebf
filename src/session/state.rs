//! Session state and its observable snapshot

use crate::conversation::{ConversationRecord, Message, DEFAULT_TITLE};
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Ready,
    Streaming,
}

/// Snapshot published to observers after every change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub conversation_id: Option<String>,
    pub title: String,
    pub messages: Vec<Message>,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub enable_search: bool,
}

/// Mutable session state, guarded by the session mutex
#[derive(Debug)]
pub(super) struct SessionState {
    pub conversation_id: Option<String>,
    pub title: String,
    pub messages: Vec<Message>,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub enable_search: bool,
    /// A title request already went out for this conversation
    pub title_attempted: bool,
    /// Cancels the running exchange
    pub cancel: Option<CancellationToken>,
    pub pump: Option<JoinHandle<()>>,
}

impl SessionState {
    pub fn new(model: String, system_prompt: String) -> Self {
        Self {
            conversation_id: None,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            status: SessionStatus::Ready,
            error: None,
            model,
            system_prompt,
            enable_search: false,
            title_attempted: false,
            cancel: None,
            pump: None,
        }
    }

    /// Start over with an unsaved conversation, keeping settings
    pub fn reset(&mut self) {
        self.conversation_id = None;
        self.title = DEFAULT_TITLE.to_string();
        self.messages.clear();
        self.status = SessionStatus::Ready;
        self.error = None;
        self.title_attempted = false;
        self.cancel = None;
        self.pump = None;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            conversation_id: self.conversation_id.clone(),
            title: self.title.clone(),
            messages: self.messages.clone(),
            status: self.status,
            error: self.error.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            enable_search: self.enable_search,
        }
    }

    /// Record to persist, if the conversation has an id yet
    pub fn record(&self) -> Option<ConversationRecord> {
        Some(ConversationRecord {
            id: self.conversation_id.clone()?,
            title: self.title.clone(),
            messages: self.messages.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            enable_search: self.enable_search,
            updated_at: Utc::now(),
        })
    }
}
