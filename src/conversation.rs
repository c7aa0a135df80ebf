//! Conversation data model
//!
//! Messages are an ordered, append/truncate-only list of typed blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to conversations until one is generated
pub const DEFAULT_TITLE: &str = "New conversation";

/// Fresh unique id for a block or conversation
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageBlock>,
}

impl Message {
    pub fn user(content: Vec<MessageBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<MessageBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Concatenated text of all `text` blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                MessageBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Content block in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBlock {
    Text {
        id: String,
        text: String,
    },
    /// Model reasoning, open while `finished` is false
    Thinking {
        id: String,
        text: String,
        started_at: DateTime<Utc>,
        #[serde(default)]
        finished: bool,
        #[serde(default)]
        elapsed_seconds: u64,
    },
    Websearch {
        id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_type: Option<String>,
    },
    Image {
        id: String,
        base64: String,
    },
    File {
        id: String,
        base64: String,
    },
}

impl MessageBlock {
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        MessageBlock::Text {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn thinking(id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        MessageBlock::Thinking {
            id: id.into(),
            text: String::new(),
            started_at,
            finished: false,
            elapsed_seconds: 0,
        }
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, MessageBlock::Thinking { .. })
    }
}

/// Durable conversation record, one row per conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub system_prompt: String,
    #[serde(default)]
    pub enable_search: bool,
    pub updated_at: DateTime<Utc>,
}

/// Listing entry for the conversation history
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub model: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&ConversationRecord> for ConversationSummary {
    fn from(record: &ConversationRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            model: record.model.clone(),
            message_count: record.messages.len(),
            updated_at: record.updated_at,
        }
    }
}
