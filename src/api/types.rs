//! API request and response types

use crate::conversation::{new_id, ConversationRecord, ConversationSummary, Message, MessageBlock};
use serde::{Deserialize, Serialize};

/// Block of an outgoing user message; ids are assigned server-side
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputBlock {
    Text { text: String },
    Image { base64: String },
    File { base64: String },
}

impl From<InputBlock> for MessageBlock {
    fn from(block: InputBlock) -> Self {
        match block {
            InputBlock::Text { text } => MessageBlock::text(new_id(), text),
            InputBlock::Image { base64 } => MessageBlock::Image { id: new_id(), base64 },
            InputBlock::File { base64 } => MessageBlock::File { id: new_id(), base64 },
        }
    }
}

/// Request to send a user message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Index to truncate the history at; appends when absent
    #[serde(default)]
    pub truncate_at: Option<usize>,
    pub content: Vec<InputBlock>,
}

impl SendMessageRequest {
    pub fn into_message(self) -> Message {
        Message::user(self.content.into_iter().map(MessageBlock::from).collect())
    }
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub id: String,
}

/// Partial settings update; absent fields are left alone
#[derive(Debug, Default, Deserialize)]
pub struct SettingsRequest {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub enable_search: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: ConversationRecord,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
