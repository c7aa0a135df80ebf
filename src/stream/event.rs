//! Typed stream events decoded from frame payloads

use crate::conversation::new_id;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// Events emitted by the inference endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ReasoningStart { id: String },
    ReasoningDelta { text: String },
    ReasoningEnd,
    TextStart { id: String },
    TextDelta { text: String },
    Error { message: String },
    Finish,
}

/// A payload that could not be decoded
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not an event object")]
    NotAnObject,
    #[error("payload has no event type")]
    MissingType,
}

/// Permissive view of a payload.
///
/// Every field is optional and untyped so one odd field never costs the
/// whole frame.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: Option<Value>,
    id: Option<Value>,
    text: Option<Value>,
    delta: Option<Value>,
    error: Option<Value>,
    message: Option<Value>,
}

/// Strings as-is, numbers in their JSON form; anything else is absent
fn scalar_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Best human-readable text inside an error field
fn message_in(value: Option<Value>) -> Option<String> {
    let text = match value? {
        Value::Object(mut map) => message_in(map.remove("message")),
        other => scalar_text(Some(other)),
    };
    text.filter(|m| !m.is_empty())
}

impl RawEvent {
    fn id(&mut self) -> String {
        scalar_text(self.id.take()).unwrap_or_else(new_id)
    }

    /// `text` wins when both spellings are present
    fn text(&mut self) -> String {
        scalar_text(self.text.take())
            .or_else(|| scalar_text(self.delta.take()))
            .unwrap_or_default()
    }

    fn error_message(self) -> String {
        message_in(self.error)
            .or_else(|| message_in(self.message))
            .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string())
    }
}

impl StreamEvent {
    /// Decode one frame payload.
    ///
    /// `Ok(None)` means a well-formed event of a type this client does not
    /// handle; callers skip it.
    pub fn parse(payload: &str) -> Result<Option<Self>, InterpretError> {
        let value: Value = serde_json::from_str(payload)?;
        if !value.is_object() {
            return Err(InterpretError::NotAnObject);
        }
        let mut raw: RawEvent = serde_json::from_value(value)?;
        let kind = match raw.kind.take() {
            Some(Value::String(kind)) => kind,
            _ => return Err(InterpretError::MissingType),
        };

        let event = match kind.as_str() {
            "reasoning-start" => StreamEvent::ReasoningStart { id: raw.id() },
            "reasoning-delta" => StreamEvent::ReasoningDelta { text: raw.text() },
            "reasoning-end" => StreamEvent::ReasoningEnd,
            "text-start" => StreamEvent::TextStart { id: raw.id() },
            "text-delta" => StreamEvent::TextDelta { text: raw.text() },
            "error" => StreamEvent::Error {
                message: raw.error_message(),
            },
            "finish" => StreamEvent::Finish,
            _ => return Ok(None),
        };

        Ok(Some(event))
    }
}
