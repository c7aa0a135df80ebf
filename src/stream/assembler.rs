//! Folds stream events into assistant message blocks
//!
//! The assembler tracks the open block explicitly. A block is only ever
//! appended to while it is the open block, and opening a new block closes the
//! previous one, so blocks never change once something follows them.

use super::StreamEvent;
use crate::conversation::{new_id, Message, MessageBlock, Role};
use chrono::{DateTime, Utc};

/// Prefix of the visible block appended for provider errors
const ERROR_MARKER: &str = "❌ Error: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Thinking,
    Text,
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    index: usize,
    kind: BlockKind,
}

/// What the read loop should do after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop reading; `error` carries a provider error message
    Stop { error: Option<String> },
}

/// Builds the assistant message for one exchange
#[derive(Debug, Default)]
pub struct BlockAssembler {
    /// Index of the assistant message being built
    target: Option<usize>,
    open: Option<OpenBlock>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event to `messages`
    pub fn apply(
        &mut self,
        messages: &mut Vec<Message>,
        event: StreamEvent,
        now: DateTime<Utc>,
    ) -> Flow {
        match event {
            StreamEvent::ReasoningStart { id } => {
                self.open_new(messages, MessageBlock::thinking(id, now), BlockKind::Thinking, now);
            }
            StreamEvent::ReasoningDelta { text } => {
                if let Some(MessageBlock::Thinking { text: buf, .. }) =
                    self.open_block(messages, BlockKind::Thinking)
                {
                    buf.push_str(&text);
                }
            }
            StreamEvent::ReasoningEnd => {
                if self.open.is_some_and(|o| o.kind == BlockKind::Thinking) {
                    self.close(messages, now);
                }
            }
            StreamEvent::TextStart { id } => {
                self.open_new(messages, MessageBlock::text(id, ""), BlockKind::Text, now);
            }
            StreamEvent::TextDelta { text } => {
                if let Some(MessageBlock::Text { text: buf, .. }) =
                    self.open_block(messages, BlockKind::Text)
                {
                    buf.push_str(&text);
                }
            }
            StreamEvent::Error { message } => {
                self.close(messages, now);
                let target = self.ensure_target(messages);
                messages[target]
                    .content
                    .push(MessageBlock::text(new_id(), format!("{ERROR_MARKER}{message}")));
                return Flow::Stop {
                    error: Some(message),
                };
            }
            StreamEvent::Finish => return Flow::Stop { error: None },
        }
        Flow::Continue
    }

    /// Close the open block, finishing it if it is a reasoning block
    pub fn close(&mut self, messages: &mut [Message], now: DateTime<Utc>) {
        let Some(open) = self.open.take() else {
            return;
        };
        let block = self
            .target
            .and_then(|t| messages.get_mut(t))
            .and_then(|m| m.content.get_mut(open.index));
        if let Some(MessageBlock::Thinking {
            started_at,
            finished,
            elapsed_seconds,
            ..
        }) = block
        {
            *finished = true;
            *elapsed_seconds = elapsed_seconds_between(*started_at, now);
        }
    }

    fn open_new(
        &mut self,
        messages: &mut Vec<Message>,
        block: MessageBlock,
        kind: BlockKind,
        now: DateTime<Utc>,
    ) {
        self.close(messages, now);
        let target = self.ensure_target(messages);
        let content = &mut messages[target].content;
        content.push(block);
        self.open = Some(OpenBlock {
            index: content.len() - 1,
            kind,
        });
    }

    fn open_block<'m>(
        &self,
        messages: &'m mut [Message],
        kind: BlockKind,
    ) -> Option<&'m mut MessageBlock> {
        let open = self.open.filter(|o| o.kind == kind)?;
        messages.get_mut(self.target?)?.content.get_mut(open.index)
    }

    fn ensure_target(&mut self, messages: &mut Vec<Message>) -> usize {
        if let Some(target) = self.target {
            if target < messages.len() {
                return target;
            }
        }
        if messages.last().map(|m| m.role) != Some(Role::Assistant) {
            messages.push(Message::assistant(Vec::new()));
        }
        let target = messages.len() - 1;
        self.target = Some(target);
        target
    }
}

fn elapsed_seconds_between(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (now - started_at).num_milliseconds().max(0);
    u64::try_from((millis + 500) / 1000).unwrap_or(0)
}
