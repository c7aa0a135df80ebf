//! Mock implementations for testing
//!
//! These mocks let the session run end to end without network or disk.

use crate::conversation::ConversationRecord;
use crate::db::{ConversationStore, DbError, DbResult};
use crate::llm::{ByteStream, ChatRequest, ChatTransport, LlmError};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Chunk = Result<Vec<u8>, LlmError>;

// ============================================================================
// Mock Transport
// ============================================================================

enum Scripted {
    Stream(mpsc::UnboundedReceiver<Chunk>),
    Fail(LlmError),
}

/// Transport that replays queued responses in order
pub struct MockTransport {
    scripts: Mutex<VecDeque<Scripted>>,
    /// Record of all requests made
    requests: Mutex<Vec<ChatRequest>>,
}

/// Sender side of a stream the test feeds while the session reads it.
///
/// Dropping it ends the stream.
pub struct LiveStream {
    tx: mpsc::UnboundedSender<Chunk>,
}

impl LiveStream {
    pub fn event(&self, payload: &str) {
        self.raw(format!("data: {payload}\n\n").as_bytes());
    }

    pub fn raw(&self, bytes: &[u8]) {
        let _ = self.tx.send(Ok(bytes.to_vec()));
    }

    pub fn fail(&self, error: LlmError) {
        let _ = self.tx.send(Err(error));
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response made of raw chunks, delivered as given
    pub fn queue_chunks(&self, chunks: Vec<Vec<u8>>) {
        let live = self.queue_live();
        for chunk in chunks {
            live.raw(&chunk);
        }
    }

    /// Queue a response with one `data:` record per payload
    pub fn queue_events(&self, payloads: &[&str]) {
        let live = self.queue_live();
        for payload in payloads {
            live.event(payload);
        }
    }

    /// Queue a failure to open the stream
    pub fn queue_error(&self, error: LlmError) {
        self.scripts.lock().unwrap().push_back(Scripted::Fail(error));
    }

    /// Queue a response whose chunks the test sends later
    pub fn queue_live(&self) -> LiveStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Scripted::Stream(rx));
        LiveStream { tx }
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Scripted::Stream(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            Some(Scripted::Fail(e)) => Err(e),
            None => Err(LlmError::unknown("No mock response queued")),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Store backed by a map, with save counting and failure injection
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, ConversationRecord>>,
    save_attempts: AtomicUsize,
    failing_saves: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Saves attempted, including failed ones
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    pub fn record(&self, id: &str) -> Option<ConversationRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn insert(&self, record: ConversationRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn save(&self, record: &ConversationRecord) -> DbResult<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                Some("database is locked".to_string()),
            )));
        }
        self.insert(record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DbResult<Option<ConversationRecord>> {
        Ok(self.record(id))
    }

    async fn get_all(&self) -> DbResult<Vec<ConversationRecord>> {
        let mut all: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> DbResult<()> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }

    async fn rename(&self, id: &str, title: &str) -> DbResult<()> {
        if let Some(record) = self.records.lock().unwrap().get_mut(id) {
            record.title = title.to_string();
        }
        Ok(())
    }
}

// ============================================================================
// Session scenarios
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Message, MessageBlock, Role, DEFAULT_TITLE};
    use crate::llm::{LlmErrorKind, WireContent, WireRole};
    use crate::retry::RetryPolicy;
    use crate::stream::Boundary;
    use crate::session::{ChatSession, SessionConfig, SessionError, SessionStatus, SessionView};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    const REASONING_REPLY: &[&str] = &[
        r#"{"type":"reasoning-start","id":"r1"}"#,
        r#"{"type":"reasoning-delta","id":"r1","text":"thinking..."}"#,
        r#"{"type":"reasoning-end","id":"r1"}"#,
        r#"{"type":"text-start","id":"t1"}"#,
        r#"{"type":"text-delta","id":"t1","text":"Hello"}"#,
        r#"{"type":"text-delta","id":"t1","text":" there"}"#,
        "[DONE]",
    ];

    fn test_config() -> SessionConfig {
        SessionConfig {
            default_model: "test-model".to_string(),
            default_system_prompt: "Be helpful".to_string(),
            title_model: "title-model".to_string(),
            auto_title: false,
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            framing: Boundary::BlankLine,
        }
    }

    fn setup_with(config: SessionConfig) -> (ChatSession, Arc<MockTransport>, Arc<InMemoryStore>) {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(InMemoryStore::new());
        let session = ChatSession::new(store.clone(), transport.clone(), config);
        (session, transport, store)
    }

    fn setup() -> (ChatSession, Arc<MockTransport>, Arc<InMemoryStore>) {
        setup_with(test_config())
    }

    fn user(text: &str) -> Message {
        Message::user(vec![MessageBlock::text(crate::conversation::new_id(), text)])
    }

    fn reply(text: &str) -> Vec<String> {
        vec![
            r#"{"type":"text-start","id":"t"}"#.to_string(),
            format!(r#"{{"type":"text-delta","text":"{text}"}}"#),
            r#"{"type":"finish"}"#.to_string(),
        ]
    }

    fn queue_reply(transport: &MockTransport, text: &str) {
        let events = reply(text);
        let refs: Vec<&str> = events.iter().map(String::as_str).collect();
        transport.queue_events(&refs);
    }

    async fn wait_for(session: &ChatSession, cond: impl FnMut(&SessionView) -> bool) -> SessionView {
        let mut rx = session.subscribe();
        let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(cond))
            .await
            .expect("timed out waiting for session")
            .expect("session dropped")
            .clone();
        view
    }

    async fn wait_ready(session: &ChatSession) -> SessionView {
        wait_for(session, |v| v.status == SessionStatus::Ready).await
    }

    #[tokio::test]
    async fn test_reasoning_and_text_reply() {
        let (session, transport, store) = setup();
        transport.queue_events(REASONING_REPLY);

        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;

        assert_eq!(view.status, SessionStatus::Ready);
        assert!(view.error.is_none());
        assert_eq!(view.messages.len(), 2);
        let content = &view.messages[1].content;
        assert_eq!(content.len(), 2);
        match &content[0] {
            MessageBlock::Thinking { text, finished, .. } => {
                assert_eq!(text, "thinking...");
                assert!(finished);
            }
            other => panic!("Expected thinking block, got {other:?}"),
        }
        assert_eq!(content[1], MessageBlock::text("t1", "Hello there"));

        let id = view.conversation_id.clone().unwrap();
        let stored = store.record(&id).unwrap();
        assert_eq!(stored.messages, view.messages);
        assert_eq!(stored.model, "test-model");
    }

    #[tokio::test]
    async fn test_line_framed_endpoint() {
        let (session, transport, _store) = setup_with(SessionConfig {
            framing: Boundary::Line,
            ..test_config()
        });
        transport.queue_chunks(vec![
            b"data: {\"type\":\"text-start\",\"id\":\"t\"}\n".to_vec(),
            b"data: {\"type\":\"text-delta\",\"text\":\"one\"}\ndata: {\"type\":\"text-delta\",\"text\":\" line\"}\n".to_vec(),
            b"data: [DONE]\n".to_vec(),
        ]);

        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;

        assert!(view.error.is_none());
        assert_eq!(view.messages[1].content, vec![MessageBlock::text("t", "one line")]);
    }

    #[tokio::test]
    async fn test_request_carries_settings() {
        let (session, transport, _store) = setup();
        session.set_model("other-model");
        session.set_system_prompt("Answer in French");
        session.set_enable_search(true);
        queue_reply(&transport, "Bonjour");

        session.send_message(0, user("Hi")).unwrap();
        wait_ready(&session).await;

        let requests = transport.recorded_requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model, "other-model");
        assert!(request.enable_search);
        assert_eq!(request.messages[0].role, WireRole::System);
        assert_eq!(
            request.messages[0].content,
            WireContent::Text("Answer in French".into())
        );
        assert_eq!(request.messages[1].content, WireContent::Text("Hi".into()));
    }

    #[tokio::test]
    async fn test_error_event_after_partial_text() {
        let (session, transport, store) = setup();
        transport.queue_events(&[
            r#"{"type":"text-start","id":"t1"}"#,
            r#"{"type":"text-delta","text":"partial"}"#,
            r#"{"type":"error","error":"overloaded"}"#,
            r#"{"type":"text-delta","text":"never applied"}"#,
        ]);

        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;

        assert_eq!(view.error.as_deref(), Some("overloaded"));
        let content = &view.messages[1].content;
        assert_eq!(content.len(), 2);
        assert_eq!(content[0], MessageBlock::text("t1", "partial"));
        match &content[1] {
            MessageBlock::Text { text, .. } => assert_eq!(text, "❌ Error: overloaded"),
            other => panic!("Expected error marker, got {other:?}"),
        }

        let stored = store.record(view.conversation_id.as_deref().unwrap()).unwrap();
        assert_eq!(stored.messages, view.messages);
    }

    #[tokio::test]
    async fn test_fragmented_stream() {
        let (session, transport, _store) = setup();
        let wire = REASONING_REPLY
            .iter()
            .map(|p| format!("data: {p}\n\n"))
            .collect::<String>()
            .into_bytes();
        transport.queue_chunks(wire.chunks(7).map(<[u8]>::to_vec).collect());

        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;
        assert_eq!(view.messages[1].text(), "Hello there");
    }

    #[tokio::test]
    async fn test_stop_keeps_and_persists_partial() {
        let (session, transport, store) = setup();
        let live = transport.queue_live();

        session.send_message(0, user("Tell me a story")).unwrap();
        live.event(r#"{"type":"reasoning-start","id":"r"}"#);
        live.event(r#"{"type":"reasoning-delta","text":"plot"}"#);
        live.event(r#"{"type":"text-start","id":"t"}"#);
        live.event(r#"{"type":"text-delta","text":"Once upon"}"#);
        wait_for(&session, |v| {
            v.messages.get(1).is_some_and(|m| m.text() == "Once upon")
        })
        .await;

        session.stop();
        let view = wait_ready(&session).await;

        assert!(view.error.is_none());
        assert_eq!(view.messages[1].text(), "Once upon");
        assert!(matches!(
            view.messages[1].content[0],
            MessageBlock::Thinking { finished: true, .. }
        ));
        let stored = store.record(view.conversation_id.as_deref().unwrap()).unwrap();
        assert_eq!(stored.messages, view.messages);

        // Further chunks go nowhere
        live.event(r#"{"type":"text-delta","text":" a time"}"#);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.view().messages[1].text(), "Once upon");
    }

    #[tokio::test]
    async fn test_stop_when_ready_is_noop() {
        let (session, _transport, _store) = setup();
        session.stop();
        assert_eq!(session.view().status, SessionStatus::Ready);
    }

    #[tokio::test]
    async fn test_send_while_streaming_is_busy() {
        let (session, transport, _store) = setup();
        let live = transport.queue_live();

        session.send_message(0, user("first")).unwrap();
        assert_eq!(session.view().status, SessionStatus::Streaming);
        assert!(matches!(
            session.send_message(1, user("second")),
            Err(SessionError::Busy)
        ));

        drop(live);
        let view = wait_ready(&session).await;
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].text(), "first");
    }

    #[tokio::test]
    async fn test_non_user_message_rejected() {
        let (session, _transport, _store) = setup();
        let result = session.send_message(0, Message::assistant(vec![]));
        assert!(matches!(result, Err(SessionError::InvalidMessage)));
        assert!(session.view().messages.is_empty());
    }

    #[tokio::test]
    async fn test_regenerate_resubmits_previous_user_message() {
        let (session, transport, _store) = setup();
        queue_reply(&transport, "A1");
        session.send_message(0, user("Q1")).unwrap();
        wait_ready(&session).await;

        queue_reply(&transport, "A2");
        session.send_message(2, user("Q2")).unwrap();
        let before = wait_ready(&session).await;
        assert_eq!(before.messages.len(), 4);

        queue_reply(&transport, "A1 again");
        session.regenerate(1).unwrap();
        let view = wait_ready(&session).await;

        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[0], before.messages[0]);
        assert_eq!(view.messages[1].text(), "A1 again");

        let requests = transport.recorded_requests();
        let last = requests.last().unwrap();
        assert_eq!(
            last.messages.last().map(|m| &m.content),
            Some(&WireContent::Text("Q1".into()))
        );
    }

    #[tokio::test]
    async fn test_regenerate_rejects_invalid_index() {
        let (session, transport, _store) = setup();
        queue_reply(&transport, "A1");
        session.send_message(0, user("Q1")).unwrap();
        wait_ready(&session).await;

        for index in [0, 2, 9] {
            assert!(matches!(
                session.regenerate(index),
                Err(SessionError::InvalidRegenerate(i)) if i == index
            ));
        }
        assert_eq!(session.view().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_edit_resend_truncates() {
        let (session, transport, _store) = setup();
        queue_reply(&transport, "A1");
        session.send_message(0, user("Q1")).unwrap();
        wait_ready(&session).await;

        queue_reply(&transport, "A1 edited");
        session.send_message(0, user("Q1 edited")).unwrap();
        let view = wait_ready(&session).await;

        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[0].text(), "Q1 edited");
        assert_eq!(view.messages[1].text(), "A1 edited");
    }

    #[tokio::test]
    async fn test_truncate_beyond_length_appends() {
        let (session, transport, _store) = setup();
        queue_reply(&transport, "A1");
        session.send_message(usize::MAX, user("Q1")).unwrap();
        let view = wait_ready(&session).await;
        assert_eq!(view.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_sets_error_and_returns_ready() {
        let (session, transport, store) = setup();
        transport.queue_error(LlmError::from_status(401, "Unauthorized", "invalid key"));

        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;

        let error = view.error.unwrap();
        assert!(error.contains("Failed to send message: 401 Unauthorized"), "{error}");
        assert_eq!(view.messages.len(), 1);
        // Auth failures are not retried
        assert_eq!(transport.recorded_requests().len(), 1);
        // The user turn was still saved
        let stored = store.record(view.conversation_id.as_deref().unwrap()).unwrap();
        assert_eq!(stored.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_retryable_open_failure_is_retried() {
        let (session, transport, _store) = setup();
        transport.queue_error(LlmError::server_error("503"));
        queue_reply(&transport, "Recovered");

        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;

        assert!(view.error.is_none());
        assert_eq!(view.messages[1].text(), "Recovered");
        assert_eq!(transport.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_failure_keeps_partial() {
        let (session, transport, _store) = setup();
        let live = transport.queue_live();
        session.send_message(0, user("Hi")).unwrap();
        live.event(r#"{"type":"text-start","id":"t"}"#);
        live.event(r#"{"type":"text-delta","text":"Half"}"#);
        live.fail(LlmError::network("connection reset"));

        let view = wait_ready(&session).await;
        assert_eq!(view.messages[1].text(), "Half");
        assert_eq!(view.error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_eager_save_failure_is_surfaced() {
        let (session, transport, store) = setup();
        store.fail_next_saves(1);
        queue_reply(&transport, "Still here");

        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;

        assert_eq!(view.messages[1].text(), "Still here");
        let error = view.error.unwrap();
        assert!(error.starts_with("Failed to save conversation"), "{error}");
        // Final save went through
        let stored = store.record(view.conversation_id.as_deref().unwrap()).unwrap();
        assert_eq!(stored.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_final_save_is_retried() {
        let (session, transport, store) = setup();
        // Eager save plus the first two final attempts fail
        store.fail_next_saves(3);
        queue_reply(&transport, "Persisted");

        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;

        assert_eq!(store.save_attempts(), 4);
        let stored = store.record(view.conversation_id.as_deref().unwrap()).unwrap();
        assert_eq!(stored.messages[1].text(), "Persisted");
    }

    #[tokio::test]
    async fn test_clear_cancels_and_resets() {
        let (session, transport, store) = setup();
        session.set_model("kept-model");
        let live = transport.queue_live();

        session.send_message(0, user("Hi")).unwrap();
        live.event(r#"{"type":"text-start","id":"t"}"#);
        live.event(r#"{"type":"text-delta","text":"Par"}"#);
        let streaming = wait_for(&session, |v| {
            v.messages.get(1).is_some_and(|m| m.text() == "Par")
        })
        .await;
        let old_id = streaming.conversation_id.unwrap();

        session.clear().await;
        let view = session.view();
        assert!(view.conversation_id.is_none());
        assert!(view.messages.is_empty());
        assert_eq!(view.status, SessionStatus::Ready);
        assert!(view.error.is_none());
        assert_eq!(view.title, DEFAULT_TITLE);
        assert_eq!(view.model, "kept-model");

        // The interrupted exchange was persisted under its own id
        let stored = store.record(&old_id).unwrap();
        assert_eq!(stored.messages[1].text(), "Par");
    }

    #[tokio::test]
    async fn test_new_conversation_after_clear_gets_new_id() {
        let (session, transport, _store) = setup();
        queue_reply(&transport, "A");
        session.send_message(0, user("Q")).unwrap();
        let first = wait_ready(&session).await.conversation_id.unwrap();

        session.clear().await;
        queue_reply(&transport, "B");
        session.send_message(0, user("Q2")).unwrap();
        let second = wait_ready(&session).await.conversation_id.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_load_conversation() {
        let (session, _transport, store) = setup();
        store.insert(ConversationRecord {
            id: "stored".to_string(),
            title: "Old chat".to_string(),
            messages: vec![user("Q"), Message::assistant(vec![MessageBlock::text("a", "A")])],
            model: String::new(),
            system_prompt: "Custom".to_string(),
            enable_search: true,
            updated_at: Utc::now(),
        });

        assert_eq!(
            session.load_conversation("stored").await.unwrap().as_deref(),
            Some("stored")
        );
        let view = session.view();
        assert_eq!(view.conversation_id.as_deref(), Some("stored"));
        assert_eq!(view.title, "Old chat");
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.model, "test-model");
        assert_eq!(view.system_prompt, "Custom");
        assert!(view.enable_search);

        assert!(session.load_conversation("missing").await.unwrap().is_none());
        assert!(session.load_conversation("").await.unwrap().is_none());
        // Unknown ids leave the session alone
        assert_eq!(session.view().conversation_id.as_deref(), Some("stored"));
    }

    #[tokio::test]
    async fn test_load_streaming_conversation_keeps_partial_reply() {
        let (session, transport, store) = setup();
        let live = transport.queue_live();

        session.send_message(0, user("Hi")).unwrap();
        live.event(r#"{"type":"text-start","id":"t"}"#);
        live.event(r#"{"type":"text-delta","text":"Partial reply"}"#);
        let streaming = wait_for(&session, |v| {
            v.messages.get(1).is_some_and(|m| m.text() == "Partial reply")
        })
        .await;
        let id = streaming.conversation_id.unwrap();

        assert_eq!(
            session.load_conversation(&id).await.unwrap().as_deref(),
            Some(id.as_str())
        );
        let view = session.view();
        assert_eq!(view.status, SessionStatus::Ready);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].text(), "Partial reply");
        assert_eq!(store.record(&id).unwrap().messages.len(), 2);
        drop(live);
    }

    #[tokio::test]
    async fn test_load_during_stream_cancels_first() {
        let (session, transport, store) = setup();
        store.insert(ConversationRecord {
            id: "other".to_string(),
            title: "Other".to_string(),
            messages: vec![user("Elsewhere")],
            model: "m".to_string(),
            system_prompt: String::new(),
            enable_search: false,
            updated_at: Utc::now(),
        });
        let _live = transport.queue_live();
        session.send_message(0, user("Hi")).unwrap();

        session.load_conversation("other").await.unwrap();
        let view = session.view();
        assert_eq!(view.status, SessionStatus::Ready);
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].text(), "Elsewhere");
    }

    #[tokio::test]
    async fn test_loaded_conversation_continues() {
        let (session, transport, store) = setup();
        store.insert(ConversationRecord {
            id: "stored".to_string(),
            title: "Old chat".to_string(),
            messages: vec![user("Q"), Message::assistant(vec![MessageBlock::text("a", "A")])],
            model: "m".to_string(),
            system_prompt: String::new(),
            enable_search: false,
            updated_at: Utc::now(),
        });
        session.load_conversation("stored").await.unwrap();

        queue_reply(&transport, "B");
        session.send_message(2, user("Q2")).unwrap();
        let view = wait_ready(&session).await;

        assert_eq!(view.conversation_id.as_deref(), Some("stored"));
        let stored = store.record("stored").unwrap();
        assert_eq!(stored.messages.len(), 4);
        assert_eq!(stored.title, "Old chat");
    }

    #[tokio::test]
    async fn test_title_generated_after_first_exchange() {
        let config = SessionConfig {
            auto_title: true,
            ..test_config()
        };
        let (session, transport, store) = setup_with(config);
        queue_reply(&transport, "It is sunny");
        queue_reply(&transport, "Paris Weather");

        session.send_message(0, user("Weather in Paris?")).unwrap();
        let view = wait_for(&session, |v| v.title != DEFAULT_TITLE).await;
        assert_eq!(view.title, "Paris Weather");

        let id = view.conversation_id.unwrap();
        for _ in 0..100 {
            if store.record(&id).is_some_and(|r| r.title == "Paris Weather") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.record(&id).unwrap().title, "Paris Weather");

        let requests = transport.recorded_requests();
        assert_eq!(requests[1].model, "title-model");
        assert_eq!(requests[1].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_title_not_requested_again() {
        let config = SessionConfig {
            auto_title: true,
            ..test_config()
        };
        let (session, transport, _store) = setup_with(config);
        // Nothing is queued for the title request, so it fails
        queue_reply(&transport, "First answer");

        session.send_message(0, user("First question")).unwrap();
        let view = wait_ready(&session).await;
        for _ in 0..100 {
            if transport.recorded_requests().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(transport.recorded_requests().len(), 2);

        queue_reply(&transport, "Second answer");
        session.send_message(view.messages.len(), user("Second question")).unwrap();
        let view = wait_ready(&session).await;
        assert_eq!(view.messages.len(), 4);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let requests = transport.recorded_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].model, "test-model");
        assert_eq!(view.title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_observers_see_every_role_in_order() {
        let (session, transport, _store) = setup();
        transport.queue_events(REASONING_REPLY);
        session.send_message(0, user("Hi")).unwrap();
        let view = wait_ready(&session).await;
        let roles: Vec<Role> = view.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_mock_transport_without_script_fails() {
        let transport = MockTransport::new();
        let request = ChatRequest::build("m", "", &[], false);
        let Err(err) = transport.open_stream(&request).await else {
            panic!("Expected failure");
        };
        assert_eq!(err.kind, LlmErrorKind::Unknown);
        assert_eq!(transport.recorded_requests().len(), 1);
    }
}
