//! Conversation title generation using a fast/cheap model
//!
//! Asks the endpoint for a short title based on the first exchange.

use crate::conversation::{Message, MessageBlock};
use crate::llm::ChatTransport;
use crate::llm::ChatRequest;
use crate::stream::{Boundary, EventReader, FrameDecoder, ReadItem, StreamEvent};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::timeout;

const TITLE_PROMPT: &str = "Based on this conversation, generate a very short title (10-15 characters) in the same language as the user's message. Only return the title text, nothing else.";

const TITLE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TITLE_CHARS: usize = 40;
/// Longest excerpt of each message included in the prompt
const MAX_EXCERPT_CHARS: usize = 500;

/// Generate a title for a conversation from its first exchange.
///
/// Returns None if generation fails (timeout, error, empty answer); the
/// conversation keeps its default title in that case.
pub async fn generate_title(
    transport: &dyn ChatTransport,
    model: &str,
    framing: Boundary,
    user_text: &str,
    assistant_text: &str,
) -> Option<String> {
    let prompt = format!(
        "{TITLE_PROMPT}\n\nUser: {}\nAssistant: {}",
        excerpt(user_text),
        excerpt(assistant_text)
    );
    let history = [Message::user(vec![MessageBlock::text(
        crate::conversation::new_id(),
        prompt,
    )])];
    let request = ChatRequest::build(model, "", &history, false);

    match timeout(TITLE_TIMEOUT, collect_text(transport, &request, framing)).await {
        Ok(Ok(text)) => {
            let title = sanitize_title(&text);
            if title.is_empty() {
                tracing::warn!("Title generation returned no text");
                None
            } else {
                Some(title)
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Title generation failed");
            None
        }
        Err(_) => {
            tracing::warn!("Title generation timed out");
            None
        }
    }
}

/// Read a whole response and return its text
async fn collect_text(
    transport: &dyn ChatTransport,
    request: &ChatRequest,
    framing: Boundary,
) -> Result<String, String> {
    let mut stream = transport
        .open_stream(request)
        .await
        .map_err(|e| e.message)?;
    let mut reader = EventReader::new(FrameDecoder::with_boundary(framing));
    let mut text = String::new();

    let mut eof = false;
    while !eof {
        match stream.next().await {
            Some(Ok(bytes)) => reader.feed(&bytes),
            Some(Err(e)) => return Err(e.message),
            None => eof = true,
        }
        let mut item = if eof { reader.finish() } else { reader.next_item() };
        while let Some(current) = item {
            match current {
                ReadItem::Done | ReadItem::Event(StreamEvent::Finish) => return Ok(text),
                ReadItem::Event(StreamEvent::TextDelta { text: delta }) => text.push_str(&delta),
                ReadItem::Event(StreamEvent::Error { message }) => return Err(message),
                ReadItem::Event(_) => {}
            }
            item = reader.next_item();
        }
    }
    Ok(text)
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > MAX_EXCERPT_CHARS {
        let cut: String = text.chars().take(MAX_EXCERPT_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// Clean up a model answer for use as a title
/// - Strip surrounding quotes
/// - Keep the first line only
/// - Truncate to a display-friendly length
fn sanitize_title(raw: &str) -> String {
    const QUOTES: &[char] = &['"', '\'', '“', '”', '‘', '’', '`'];

    let unquoted = raw.trim().trim_matches(QUOTES).trim();
    let first_line = unquoted.lines().next().unwrap_or_default().trim();
    let first_line = first_line.trim_matches(QUOTES).trim();
    first_line.chars().take(MAX_TITLE_CHARS).collect::<String>().trim_end().to_string()
}
