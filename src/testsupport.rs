//! Shared test fixtures.
//!
//! Event and descriptor builders mirror the server's wire shapes so reducer,
//! finalizer and engine tests exercise the same decoding path production
//! code does.

use crate::error::ApiError;
use crate::finalizer::TurnQuery;
use crate::types::MessageDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("turnsync-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write UTF-8 text to a child path, creating parent directories as needed.
    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// One SSE frame carrying a JSON event envelope.
pub fn sse_frame(envelope: &Value) -> String {
    format!("data: {envelope}\n\n")
}

/// Raw `{type, properties}` envelopes.
pub mod envelopes {
    use serde_json::{json, Value};

    pub fn envelope(event_type: &str, properties: Value) -> Value {
        json!({"type": event_type, "properties": properties})
    }

    pub fn assistant_message(session: &str, id: &str, created: u64, completed: Option<u64>) -> Value {
        let mut time = json!({"created": created});
        if let Some(completed) = completed {
            time["completed"] = json!(completed);
        }
        envelope(
            "message.updated",
            json!({"info": {"id": id, "sessionID": session, "role": "assistant", "time": time}}),
        )
    }

    pub fn text_part(session: &str, message: &str, part: &str, text: &str) -> Value {
        envelope(
            "message.part.updated",
            json!({"part": {"id": part, "sessionID": session, "messageID": message, "type": "text", "text": text}}),
        )
    }

    pub fn idle(session: &str) -> Value {
        envelope("session.idle", json!({"sessionID": session}))
    }
}

/// Decoded [`StreamEvent`](crate::reducer::StreamEvent) builders.
pub mod events {
    use super::envelopes::{self, envelope};
    use crate::reducer::StreamEvent;
    use serde_json::{json, Value};

    pub fn assistant_message(session: &str, id: &str, created: u64, completed: Option<u64>) -> StreamEvent {
        StreamEvent::from_value(&envelopes::assistant_message(session, id, created, completed))
    }

    pub fn assistant_message_with_error(session: &str, id: &str, created: u64, error: Value) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "message.updated",
            json!({"info": {"id": id, "sessionID": session, "role": "assistant",
                            "time": {"created": created}, "error": error}}),
        ))
    }

    pub fn user_message(session: &str, id: &str, created: u64) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "message.updated",
            json!({"info": {"id": id, "sessionID": session, "role": "user", "time": {"created": created}}}),
        ))
    }

    pub fn text_part(session: &str, message: &str, part: &str, text: &str) -> StreamEvent {
        StreamEvent::from_value(&envelopes::text_part(session, message, part, text))
    }

    pub fn reasoning_part(session: &str, message: &str, part: &str, text: &str) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "message.part.updated",
            json!({"part": {"id": part, "sessionID": session, "messageID": message, "type": "reasoning", "text": text}}),
        ))
    }

    pub fn tool_part(session: &str, message: &str, part: &str, tool: &str, status: &str) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "message.part.updated",
            json!({"part": {"id": part, "sessionID": session, "messageID": message, "type": "tool",
                            "tool": tool, "state": {"status": status}}}),
        ))
    }

    pub fn part_delta(session: &str, message: &str, part: &str, delta: &str) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "message.part.delta",
            json!({"sessionID": session, "messageID": message, "partID": part, "field": "text", "delta": delta}),
        ))
    }

    pub fn part_removed(session: &str, message: &str, part: &str) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "message.part.removed",
            json!({"sessionID": session, "messageID": message, "partID": part}),
        ))
    }

    pub fn status(session: &str, status: Value) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "session.status",
            json!({"sessionID": session, "status": status}),
        ))
    }

    pub fn idle(session: &str) -> StreamEvent {
        StreamEvent::from_value(&envelopes::idle(session))
    }

    pub fn session_error(session: Option<&str>, message: &str) -> StreamEvent {
        let mut properties = json!({"error": {"message": message}});
        if let Some(session) = session {
            properties["sessionID"] = json!(session);
        }
        StreamEvent::from_value(&envelope("session.error", properties))
    }

    pub fn permission(session: &str, id: &str) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "permission.asked",
            json!({"id": id, "sessionID": session, "permission": "bash", "patterns": ["ls"]}),
        ))
    }

    pub fn question(session: &str, id: &str) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "question.asked",
            json!({"id": id, "sessionID": session, "questions": [{"question": "Proceed?"}]}),
        ))
    }

    pub fn question_replied(session: &str, id: &str) -> StreamEvent {
        StreamEvent::from_value(&envelope(
            "question.replied",
            json!({"sessionID": session, "requestID": id, "answers": [["yes"]]}),
        ))
    }

    pub fn heartbeat() -> StreamEvent {
        StreamEvent::from_value(&envelope("server.heartbeat", json!({})))
    }

    /// Sends `prelude`, then a heartbeat every `every` until the receiver is
    /// dropped.
    pub fn with_heartbeats(
        prelude: Vec<StreamEvent>,
        every: std::time::Duration,
    ) -> tokio::sync::mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        for event in prelude {
            let _ = tx.send(event);
        }
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                if tx.send(heartbeat()).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// Message descriptor and raw part builders for fetch responses.
pub mod descriptors {
    use crate::types::MessageDescriptor;
    use serde_json::{json, Value};

    pub fn assistant(id: &str, created: u64, completed: Option<u64>, parts: Vec<Value>) -> MessageDescriptor {
        let mut time = json!({"created": created});
        if let Some(completed) = completed {
            time["completed"] = json!(completed);
        }
        MessageDescriptor {
            info: json!({"id": id, "role": "assistant", "time": time}),
            parts,
        }
    }

    pub fn text(id: &str, message: &str, text: &str) -> Value {
        json!({"id": id, "messageID": message, "type": "text", "text": text})
    }

    pub fn step_start(id: &str, message: &str) -> Value {
        json!({"id": id, "messageID": message, "type": "step-start"})
    }

    pub fn step_finish(id: &str, message: &str, reason: &str) -> Value {
        json!({"id": id, "messageID": message, "type": "step-finish", "reason": reason})
    }

    pub fn tool(id: &str, message: &str, tool: &str, status: &str) -> Value {
        json!({"id": id, "messageID": message, "type": "tool", "tool": tool, "state": {"status": status}})
    }
}

/// Scripted reply for one [`FakeQuery`] call.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Fail(String),
}

/// Replies are consumed in order; the last one repeats forever.
#[derive(Debug)]
struct Script<T> {
    replies: VecDeque<Reply<T>>,
    last: Reply<T>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: T) -> Self {
        Self {
            replies: VecDeque::new(),
            last: Reply::Ok(fallback),
        }
    }

    fn set(&mut self, replies: Vec<Reply<T>>) {
        self.replies = replies.into();
    }

    fn next(&mut self) -> Result<T, ApiError> {
        if let Some(reply) = self.replies.pop_front() {
            self.last = reply;
        }
        match &self.last {
            Reply::Ok(value) => Ok(value.clone()),
            Reply::Fail(message) => Err(ApiError::InvalidResponse(message.clone())),
        }
    }
}

/// Per-method call counts recorded by [`FakeQuery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCalls {
    pub by_id: usize,
    pub latest: usize,
    pub status: usize,
    pub question_pending: usize,
}

#[derive(Debug)]
struct FakeState {
    by_id: Script<Option<MessageDescriptor>>,
    latest: Script<Option<MessageDescriptor>>,
    status: Script<Option<Value>>,
    question_pending: Script<bool>,
    calls: QueryCalls,
}

/// Scripted [`TurnQuery`]. Unscripted methods answer "nothing yet".
#[derive(Debug)]
pub struct FakeQuery {
    state: Mutex<FakeState>,
}

impl Default for FakeQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeQuery {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                by_id: Script::new(None),
                latest: Script::new(None),
                status: Script::new(None),
                question_pending: Script::new(false),
                calls: QueryCalls::default(),
            }),
        }
    }

    pub fn by_id(self, replies: Vec<Reply<Option<MessageDescriptor>>>) -> Self {
        self.lock().by_id.set(replies);
        self
    }

    pub fn latest(self, replies: Vec<Reply<Option<MessageDescriptor>>>) -> Self {
        self.lock().latest.set(replies);
        self
    }

    pub fn status(self, replies: Vec<Reply<Option<Value>>>) -> Self {
        self.lock().status.set(replies);
        self
    }

    pub fn question_pending(self, replies: Vec<Reply<bool>>) -> Self {
        self.lock().question_pending.set(replies);
        self
    }

    pub fn calls(&self) -> QueryCalls {
        self.lock().calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake query state poisoned")
    }
}

#[async_trait]
impl TurnQuery for FakeQuery {
    async fn fetch_by_id(&self, _message_id: &str) -> Result<Option<MessageDescriptor>, ApiError> {
        let mut state = self.lock();
        state.calls.by_id += 1;
        state.by_id.next()
    }

    async fn fetch_latest(&self) -> Result<Option<MessageDescriptor>, ApiError> {
        let mut state = self.lock();
        state.calls.latest += 1;
        state.latest.next()
    }

    async fn fetch_status(&self) -> Result<Option<Value>, ApiError> {
        let mut state = self.lock();
        state.calls.status += 1;
        state.status.next()
    }

    async fn fetch_question_pending(&self) -> Result<bool, ApiError> {
        let mut state = self.lock();
        state.calls.question_pending += 1;
        state.question_pending.next()
    }
}

/// Loopback HTTP/1.1 server answering every request through `handler`.
///
/// The handler sees `"METHOD /path?query body"` and returns status and body.
/// Each response closes its connection.
pub struct MockServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut stream).await else {
                        return;
                    };
                    recorded.lock().expect("requests").push(request.clone());
                    let (status, body) = handler(&request);
                    let response = format!(
                        "HTTP/1.1 {status} MOCK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests").clone()
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 2048];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let mut request_line = head.lines().next()?.split_whitespace();
    let method = request_line.next()?;
    let target = request_line.next()?;
    let body_end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..body_end]);
    Some(format!("{method} {target} {body}").trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn temp_dir_fixture_writes_files() {
        let fixture = TestTempDir::new("fixture");
        let file = fixture.write_text("nested/file.txt", "hello");
        assert_eq!(fs::read_to_string(file).unwrap(), "hello");
        assert!(fixture.path().exists());
    }

    #[test]
    fn sse_frame_is_one_data_line() {
        let frame = sse_frame(&json!({"type": "session.idle"}));
        assert_eq!(frame, "data: {\"type\":\"session.idle\"}\n\n");
    }

    #[tokio::test]
    async fn fake_query_repeats_last_reply_and_counts_calls() {
        let query = FakeQuery::new().question_pending(vec![Reply::Ok(true), Reply::Fail("x".into())]);
        assert!(query.fetch_question_pending().await.unwrap());
        assert!(query.fetch_question_pending().await.is_err());
        assert!(query.fetch_question_pending().await.is_err());
        assert_eq!(query.fetch_status().await.unwrap(), None);
        assert_eq!(query.calls().question_pending, 3);
        assert_eq!(query.calls().status, 1);
    }

    #[tokio::test]
    async fn mock_server_records_requests() {
        let server = MockServer::start(|request| {
            if request.starts_with("POST") {
                (204, String::new())
            } else {
                (200, "{\"ok\":true}".to_string())
            }
        })
        .await;
        let http = reqwest::Client::new();
        let body: Value = http
            .get(format!("{}/ping?x=1", server.base_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({"ok": true}));
        let status = http
            .post(format!("{}/echo", server.base_url()))
            .body("hello")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status.as_u16(), 204);
        assert_eq!(
            server.requests(),
            vec!["GET /ping?x=1".to_string(), "POST /echo hello".to_string()]
        );
    }
}
