//! Outbound request types

use crate::conversation::{Message, MessageBlock, Role};
use serde::Serialize;

/// Streaming chat request sent to the inference endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(rename = "enableSearch")]
    pub enable_search: bool,
    pub stream: bool,
}

impl ChatRequest {
    /// Build a request from conversation history.
    ///
    /// A non-empty system prompt goes first. Reasoning blocks stay local and
    /// messages left without content are dropped.
    pub fn build(
        model: impl Into<String>,
        system_prompt: &str,
        history: &[Message],
        enable_search: bool,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.trim().is_empty() {
            messages.push(WireMessage {
                role: WireRole::System,
                content: WireContent::Text(system_prompt.to_string()),
            });
        }
        messages.extend(history.iter().filter_map(WireMessage::from_message));

        Self {
            model: model.into(),
            messages,
            enable_search,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: WireContent,
}

/// Plain string for text-only messages, part list otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImage },
    File { file: WireFile },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireFile {
    pub file_data: String,
}

impl WireMessage {
    fn from_message(message: &Message) -> Option<Self> {
        let parts: Vec<WirePart> = message
            .content
            .iter()
            .filter_map(|block| match block {
                MessageBlock::Text { text, .. } if !text.is_empty() => {
                    Some(WirePart::Text { text: text.clone() })
                }
                MessageBlock::Image { base64, .. } => Some(WirePart::ImageUrl {
                    image_url: WireImage {
                        url: base64.clone(),
                    },
                }),
                MessageBlock::File { base64, .. } => Some(WirePart::File {
                    file: WireFile {
                        file_data: base64.clone(),
                    },
                }),
                MessageBlock::Text { .. }
                | MessageBlock::Thinking { .. }
                | MessageBlock::Websearch { .. } => None,
            })
            .collect();

        if parts.is_empty() {
            return None;
        }

        let role = match message.role {
            Role::User => WireRole::User,
            Role::Assistant => WireRole::Assistant,
        };

        let content = if parts.iter().all(|p| matches!(p, WirePart::Text { .. })) {
            WireContent::Text(
                parts
                    .into_iter()
                    .filter_map(|p| match p {
                        WirePart::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            )
        } else {
            WireContent::Parts(parts)
        };

        Some(Self { role, content })
    }
}
