//! Chat session controller
//!
//! A session owns one live conversation and at most one in-flight exchange.
//! Every state change is published on a watch channel so the UI layer can
//! render without polling.

mod exchange;
mod state;

#[cfg(test)]
pub mod testing;

pub use state::{SessionStatus, SessionView};
use state::SessionState;

use crate::conversation::{new_id, ConversationRecord, Message, Role};
use crate::db::ConversationStore;
use crate::error::ChatError;
use crate::llm::ChatTransport;
use crate::retry::RetryPolicy;
use crate::stream::Boundary;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_TITLE_MODEL: &str = "google/gemini-2.5-flash-lite";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub default_model: String,
    pub default_system_prompt: String,
    /// Model used for background title generation
    pub title_model: String,
    /// Name new conversations after their first exchange
    pub auto_title: bool,
    pub retry: RetryPolicy,
    /// How the endpoint delimits `data:` records
    pub framing: Boundary,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            default_system_prompt: String::new(),
            title_model: DEFAULT_TITLE_MODEL.to_string(),
            auto_title: true,
            retry: RetryPolicy::default(),
            framing: Boundary::BlankLine,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A response is already streaming")]
    Busy,
    #[error("Message {0} is not an assistant reply to a user message")]
    InvalidRegenerate(usize),
    #[error("Only user messages can be sent")]
    InvalidMessage,
    #[error(transparent)]
    Store(#[from] ChatError),
}

/// Handle to the live session; clones share state
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ConversationStore>,
    transport: Arc<dyn ChatTransport>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    view_tx: watch::Sender<SessionView>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SessionState) {
        self.view_tx.send_replace(state.view());
    }
}

impl ChatSession {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        transport: Arc<dyn ChatTransport>,
        config: SessionConfig,
    ) -> Self {
        let state = SessionState::new(
            config.default_model.clone(),
            config.default_system_prompt.clone(),
        );
        let (view_tx, _) = watch::channel(state.view());
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                config,
                state: Mutex::new(state),
                view_tx,
            }),
        }
    }

    /// Current snapshot
    pub fn view(&self) -> SessionView {
        self.inner.lock().view()
    }

    /// Receiver that sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.view_tx.subscribe()
    }

    /// Replace everything from `truncate_at` on with `message` and stream a
    /// reply.
    ///
    /// Returns once the exchange has started; progress is observed through
    /// [`ChatSession::subscribe`].
    pub fn send_message(&self, truncate_at: usize, message: Message) -> Result<(), SessionError> {
        if message.role != Role::User {
            return Err(SessionError::InvalidMessage);
        }

        let mut state = self.inner.lock();
        if state.status == SessionStatus::Streaming {
            return Err(SessionError::Busy);
        }

        let keep = truncate_at.min(state.messages.len());
        state.messages.truncate(keep);
        state.messages.push(message);
        state.error = None;
        let conv_id = state.conversation_id.get_or_insert_with(new_id).clone();
        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());
        state.status = SessionStatus::Streaming;
        self.inner.publish(&state);

        tracing::info!(conv_id = %conv_id, messages = state.messages.len(), "Starting exchange");
        let pump = tokio::spawn(exchange::run(self.inner.clone(), cancel));
        state.pump = Some(pump);
        Ok(())
    }

    /// Cancel the in-flight exchange; partial output is kept
    pub fn stop(&self) {
        let state = self.inner.lock();
        if let Some(cancel) = &state.cancel {
            tracing::info!(conv_id = ?state.conversation_id, "Stopping exchange");
            cancel.cancel();
        }
    }

    /// Drop the assistant reply at `index` and ask again
    pub fn regenerate(&self, index: usize) -> Result<(), SessionError> {
        let prompt = {
            let state = self.inner.lock();
            match (index.checked_sub(1), state.messages.get(index)) {
                (Some(prev), Some(reply)) if reply.role == Role::Assistant => state
                    .messages
                    .get(prev)
                    .filter(|m| m.role == Role::User)
                    .cloned(),
                _ => None,
            }
        };
        let prompt = prompt.ok_or(SessionError::InvalidRegenerate(index))?;
        self.send_message(index - 1, prompt)
    }

    /// Start a new, unsaved conversation
    pub async fn clear(&self) {
        let mut state = self.halt().await;
        state.reset();
        self.inner.publish(&state);
    }

    /// Replace the session with a stored conversation.
    ///
    /// Returns the loaded id, or `None` when nothing is stored under `id`.
    pub async fn load_conversation(&self, id: &str) -> Result<Option<String>, SessionError> {
        if id.is_empty() || self.fetch(id).await?.is_none() {
            return Ok(None);
        }

        // The running exchange may be writing this very conversation; read it
        // only after its final save has landed.
        let (record, mut state) = loop {
            drop(self.halt().await);
            let Some(record) = self.fetch(id).await? else {
                return Ok(None);
            };
            let state = self.inner.lock();
            if state.status == SessionStatus::Ready {
                break (record, state);
            }
        };
        state.reset();
        state.conversation_id = Some(record.id.clone());
        state.title = record.title;
        state.messages = record.messages;
        state.model = non_empty_or(record.model, &self.inner.config.default_model);
        state.system_prompt =
            non_empty_or(record.system_prompt, &self.inner.config.default_system_prompt);
        state.enable_search = record.enable_search;
        self.inner.publish(&state);

        tracing::info!(conv_id = %record.id, "Loaded conversation");
        Ok(Some(record.id))
    }

    pub fn set_model(&self, model: impl Into<String>) {
        let mut state = self.inner.lock();
        state.model = model.into();
        self.inner.publish(&state);
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        let mut state = self.inner.lock();
        state.system_prompt = prompt.into();
        self.inner.publish(&state);
    }

    pub fn set_enable_search(&self, enabled: bool) {
        let mut state = self.inner.lock();
        state.enable_search = enabled;
        self.inner.publish(&state);
    }

    async fn fetch(&self, id: &str) -> Result<Option<ConversationRecord>, SessionError> {
        self.inner
            .store
            .get(id)
            .await
            .map_err(|e| SessionError::Store(ChatError::from(e)))
    }

    /// Cancel and wait out any running exchange.
    ///
    /// Returns with the lock held and the session ready, so the caller can
    /// replace state before another send gets in.
    async fn halt(&self) -> MutexGuard<'_, SessionState> {
        loop {
            let (cancel, pump) = {
                let mut state = self.inner.lock();
                if state.status == SessionStatus::Ready {
                    return state;
                }
                (state.cancel.clone(), state.pump.take())
            };
            if let Some(cancel) = cancel {
                cancel.cancel();
            }
            match pump {
                Some(pump) => {
                    if let Err(e) = pump.await {
                        tracing::error!(error = %e, "Exchange task failed");
                        self.inner.lock().status = SessionStatus::Ready;
                    }
                }
                // Another caller is already waiting on the task
                None => tokio::task::yield_now().await,
            }
        }
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
