//! One request/response exchange, run as a background task

use super::{Inner, SessionStatus};
use crate::conversation::{ConversationRecord, Role, DEFAULT_TITLE};
use crate::error::ChatError;
use crate::llm::ChatRequest;
use crate::retry::{with_backoff, Attempt};
use crate::stream::{BlockAssembler, EventReader, Flow, FrameDecoder, ReadItem};
use crate::title_generator;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How the read loop ended
enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

pub(super) async fn run(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut assembler = BlockAssembler::new();
    let outcome = stream_reply(&inner, &cancel, &mut assembler).await;
    finalize(&inner, assembler, outcome).await;
}

async fn stream_reply(
    inner: &Arc<Inner>,
    cancel: &CancellationToken,
    assembler: &mut BlockAssembler,
) -> Outcome {
    let (request, record) = {
        let state = inner.lock();
        let request = ChatRequest::build(
            state.model.clone(),
            &state.system_prompt,
            &state.messages,
            state.enable_search,
        );
        (request, state.record())
    };

    // Persist the user turn before anything can go wrong on the network
    if let Some(record) = record {
        if let Err(e) = inner.store.save(&record).await {
            let err = ChatError::from(e);
            tracing::warn!(conv_id = %record.id, error = %err, "Eager save failed");
            let mut state = inner.lock();
            state.error = Some(err.user_message());
            inner.publish(&state);
        }
    }

    let transport = inner.transport.clone();
    let opened = with_backoff(inner.config.retry, cancel, || {
        let transport = transport.clone();
        let request = request.clone();
        async move { transport.open_stream(&request).await }
    })
    .await;

    let mut stream = match opened {
        Attempt::Done(Ok(stream)) => stream,
        Attempt::Done(Err(e)) => return Outcome::Failed(ChatError::from(e).user_message()),
        Attempt::Cancelled => return Outcome::Cancelled,
    };

    let mut reader = EventReader::new(FrameDecoder::with_boundary(inner.config.framing));
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Cancelled,
            chunk = stream.next() => chunk,
        };

        let eof = match chunk {
            Some(Ok(bytes)) => {
                reader.feed(&bytes);
                false
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Stream interrupted");
                return Outcome::Failed(ChatError::from(e).user_message());
            }
            None => true,
        };

        // Drain everything already buffered before waiting again
        let mut item = if eof {
            reader.finish()
        } else {
            reader.next_item()
        };
        while let Some(current) = item {
            let event = match current {
                ReadItem::Done => return Outcome::Completed,
                ReadItem::Event(event) => event,
            };
            let flow = {
                let mut state = inner.lock();
                let flow = assembler.apply(&mut state.messages, event, Utc::now());
                inner.publish(&state);
                flow
            };
            match flow {
                Flow::Continue => {}
                Flow::Stop { error: None } => return Outcome::Completed,
                Flow::Stop {
                    error: Some(message),
                } => return Outcome::Failed(message),
            }
            item = reader.next_item();
        }

        if eof {
            return Outcome::Completed;
        }
    }
}

async fn finalize(inner: &Arc<Inner>, mut assembler: BlockAssembler, outcome: Outcome) {
    let record = {
        let mut state = inner.lock();
        assembler.close(&mut state.messages, Utc::now());
        match &outcome {
            Outcome::Failed(message) => state.error = Some(message.clone()),
            Outcome::Cancelled => tracing::info!(conv_id = ?state.conversation_id, "Exchange cancelled"),
            Outcome::Completed => {}
        }
        inner.publish(&state);
        state.record()
    };

    if let Some(record) = &record {
        // The exchange token may already be cancelled; the final save must still happen
        let never = CancellationToken::new();
        let store = inner.store.clone();
        let saved = with_backoff(inner.config.retry, &never, || {
            let store = store.clone();
            let record = record.clone();
            async move { store.save(&record).await.map_err(ChatError::from) }
        })
        .await;
        if let Attempt::Done(Err(err)) = saved {
            tracing::error!(conv_id = %record.id, error = %err, "Failed to persist conversation");
            let mut state = inner.lock();
            state.error.get_or_insert_with(|| err.user_message());
            inner.publish(&state);
        }
    }

    {
        let mut state = inner.lock();
        state.status = SessionStatus::Ready;
        state.cancel = None;
        state.pump = None;
        inner.publish(&state);
    }
    tracing::info!(
        conv_id = ?record.as_ref().map(|r| &r.id),
        outcome = outcome.label(),
        "Exchange finished"
    );

    if let (Outcome::Completed, Some(record)) = (outcome, record) {
        maybe_generate_title(inner, record);
    }
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Cancelled => "cancelled",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// Name a conversation after its first successful exchange
fn maybe_generate_title(inner: &Arc<Inner>, record: ConversationRecord) {
    if !inner.config.auto_title || record.title != DEFAULT_TITLE {
        return;
    }
    let user_text = record
        .messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(crate::conversation::Message::text);
    let assistant_text = record
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(crate::conversation::Message::text);
    let (Some(user_text), Some(assistant_text)) = (user_text, assistant_text) else {
        return;
    };
    if user_text.trim().is_empty() || assistant_text.trim().is_empty() {
        return;
    }
    {
        let mut state = inner.lock();
        if state.conversation_id.as_deref() != Some(record.id.as_str()) || state.title_attempted {
            return;
        }
        state.title_attempted = true;
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        let Some(title) = title_generator::generate_title(
            inner.transport.as_ref(),
            &inner.config.title_model,
            inner.config.framing,
            &user_text,
            &assistant_text,
        )
        .await
        else {
            return;
        };

        {
            let mut state = inner.lock();
            if state.conversation_id.as_deref() == Some(record.id.as_str()) {
                state.title.clone_from(&title);
                inner.publish(&state);
            }
        }
        if let Err(e) = inner.store.rename(&record.id, &title).await {
            tracing::warn!(conv_id = %record.id, error = %e, "Failed to store generated title");
        } else {
            tracing::info!(conv_id = %record.id, title = %title, "Conversation titled");
        }
    });
}
