//! Session-level scenarios against scripted and HTTP event sources.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use portal_chat::{
    turn_view, ActiveTurn, CancelHandle, ChatContext, ChatSession, ChatTarget, ClientConfig,
    ConversationTurn, EventSource, EventStream, EventView, Role, SendError, SessionObserver,
    SessionState, StreamEnd, StreamEvent, StreamRequest, StreamTransport, ToolCallDisplay,
    ToolCallStatus, TransportError, UserProfile,
};
use portal_chat_core::{Clock, ManualClock};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Scripted source
// =============================================================================

/// One scripted response body.
struct Script {
    chunks: Vec<Result<Bytes, TransportError>>,
    hang: bool,
}

impl Script {
    fn body(parts: &[&str]) -> Self {
        Self {
            chunks: parts
                .iter()
                .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
                .collect(),
            hang: false,
        }
    }

    fn hanging(parts: &[&str]) -> Self {
        Self {
            hang: true,
            ..Self::body(parts)
        }
    }

    fn failing_after(parts: &[&str]) -> Self {
        let mut script = Self::body(parts);
        script
            .chunks
            .push(Err(TransportError::Stream("connection reset".to_string())));
        script
    }
}

#[derive(Debug, Clone)]
struct Captured {
    endpoint: String,
    body: Value,
    token: Option<String>,
}

#[derive(Clone)]
struct ScriptedSource {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<Captured>>>,
    clock: Arc<ManualClock>,
}

impl ScriptedSource {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
            clock: Arc::new(ManualClock::default()),
        }
    }

    fn requests(&self) -> Vec<Captured> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn open(
        &self,
        request: StreamRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<EventStream, TransportError> {
        self.requests.lock().push(Captured {
            endpoint: request.endpoint.to_string(),
            body: serde_json::to_value(request.body)?,
            token: request.bearer_token.map(String::from),
        });

        let script = self.scripts.lock().pop_front().unwrap_or_else(|| Script::body(&[]));
        let clock: Arc<dyn Clock> = self.clock.clone();
        let body = futures::stream::iter(script.chunks);
        if script.hang {
            Ok(EventStream::from_byte_stream(
                body.chain(futures::stream::pending()),
                cancel,
                clock,
            ))
        } else {
            Ok(EventStream::from_byte_stream(body, cancel, clock))
        }
    }
}

fn course_session(source: ScriptedSource) -> ChatSession<ScriptedSource> {
    ChatSession::new(
        source,
        ClientConfig::default(),
        ChatContext::new(ChatTarget::course("EEM-204")),
    )
    .with_thread_id("t1".parse().unwrap())
}

fn record(kind: &str, body: &str) -> String {
    format!("data: {{\"type\":\"{kind}\",{body}}}\n\n")
}

fn message(text: &str) -> String {
    record("message", &format!("\"content\":\"{text}\""))
}

/// Observer that counts callbacks and can cancel after N events, or as
/// soon as the request goes out.
#[derive(Default)]
struct Watcher {
    states: Vec<SessionState>,
    events: usize,
    completions: Vec<StreamEnd>,
    errors: Vec<String>,
    cancel_after: Option<(usize, CancelHandle)>,
    cancel_on_send: Option<CancelHandle>,
}

impl SessionObserver for Watcher {
    fn on_state(&mut self, state: SessionState) {
        self.states.push(state);
        if state == SessionState::Sending {
            if let Some(handle) = &self.cancel_on_send {
                assert!(handle.cancel());
            }
        }
    }

    fn on_event(&mut self, _event: &StreamEvent, _turn: &ActiveTurn) {
        self.events += 1;
        if let Some((after, handle)) = &self.cancel_after {
            if self.events == *after {
                handle.cancel();
            }
        }
    }

    fn on_complete(&mut self, _turn: &ConversationTurn, end: StreamEnd) {
        self.completions.push(end);
    }

    fn on_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

fn assistant_text(turn: &ConversationTurn) -> &str {
    turn.assistant().map_or("", |a| a.streamed_text())
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn course_question_with_tool_call() {
    let body = [
        record("tool_start", r#""data":{"id":"1","name":"search","args":{"q":"içerik"}}"#),
        message("İçerik "),
        message("şu şekildedir."),
        record("tool_response", r#""data":{"id":"1","name":"search","result":"ok"}"#),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat();
    let source = ScriptedSource::new(vec![Script::body(&[body.as_str()])]);
    let mut chat = course_session(source.clone());

    let outcome = chat.send("Bu dersin içeriği nedir?").await.unwrap();
    assert_eq!(outcome.end, StreamEnd::Done);

    let sent = source.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].body,
        json!({
            "message": "Bu dersin içeriği nedir?",
            "thread_id": "t1",
            "course_id": "EEM-204",
        })
    );
    assert_eq!(sent[0].endpoint, "http://127.0.0.1:8000/api/chat/course");

    let turn = chat.transcript().last().unwrap();
    assert_eq!(turn.role(), Role::Assistant);
    assert!(!turn.is_streaming());
    assert_eq!(assistant_text(turn), "İçerik şu şekildedir.");

    let calls = turn.assistant().unwrap().tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool_name, "search");
    assert!(calls[0].duration_ms().is_some());

    let rows = turn_view(turn);
    assert_eq!(rows.len(), 1);
    assert!(matches!(
        &rows[0],
        EventView::ToolCall(view) if matches!(view.status, ToolCallDisplay::Completed { .. })
    ));
}

#[tokio::test]
async fn split_records_reassemble_across_reads() {
    let source = ScriptedSource::new(vec![Script::body(&[
        "data: {\"typ",
        "e\":\"message\",\"content\":\"Mer\"}\n\nda",
        "ta: {\"type\":\"message\",\"content\":\"haba\"}\n\n",
    ])]);
    let mut chat = course_session(source);
    chat.send("selam").await.unwrap();
    assert_eq!(assistant_text(chat.transcript().last().unwrap()), "Merhaba");
}

#[tokio::test]
async fn malformed_record_does_not_interrupt() {
    let body = [message("a"), "data: {\"type\": oops}\n\n".to_string(), message("b")].concat();
    let source = ScriptedSource::new(vec![Script::body(&[body.as_str()])]);
    let mut chat = course_session(source);
    let mut watcher = Watcher::default();

    let outcome = chat.send_with("x", &mut watcher).await.unwrap();
    assert_eq!(outcome.end, StreamEnd::Closed);
    assert_eq!(assistant_text(chat.transcript().last().unwrap()), "ab");
    assert!(watcher.errors.is_empty());
}

#[tokio::test]
async fn done_then_close_completes_once() {
    let body = [message("a"), "data: [DONE]\n\n".to_string(), message("ignored")].concat();
    let source = ScriptedSource::new(vec![Script::body(&[body.as_str()])]);
    let mut chat = course_session(source);
    let mut watcher = Watcher::default();

    chat.send_with("x", &mut watcher).await.unwrap();
    assert_eq!(watcher.completions, vec![StreamEnd::Done]);
    assert_eq!(assistant_text(chat.transcript().last().unwrap()), "a");
}

#[tokio::test]
async fn cancel_mid_stream_keeps_partial_text() {
    let body = [message("İlk "), message("ikinci"), message(" üçüncü")].concat();
    let source = ScriptedSource::new(vec![Script::hanging(&[body.as_str()])]);
    let mut chat = course_session(source);
    let mut watcher = Watcher {
        cancel_after: Some((2, chat.cancel_handle())),
        ..Watcher::default()
    };

    let outcome = chat.send_with("x", &mut watcher).await.unwrap();
    assert_eq!(outcome.end, StreamEnd::Cancelled);
    assert_eq!(watcher.events, 2);
    assert_eq!(watcher.completions, vec![StreamEnd::Cancelled]);
    assert!(watcher.errors.is_empty());

    assert_eq!(chat.state(), SessionState::Idle);
    assert!(chat.last_error().is_none());
    let turn = chat.transcript().last().unwrap();
    assert_eq!(assistant_text(turn), "İlk ikinci");
    assert!(!turn.is_streaming());
}

#[tokio::test]
async fn cancel_freezes_pending_tool_calls() {
    let body = [
        record("tool_start", r#""data":{"id":"1","name":"db_lookup"}"#),
        message("bekleyin"),
    ]
    .concat();
    let source = ScriptedSource::new(vec![Script::hanging(&[body.as_str()])]);
    let mut chat = course_session(source);
    let mut watcher = Watcher {
        cancel_after: Some((2, chat.cancel_handle())),
        ..Watcher::default()
    };

    chat.send_with("x", &mut watcher).await.unwrap();
    let turn = chat.transcript().last().unwrap();
    let calls = turn.assistant().unwrap().tool_calls();
    assert_eq!(calls[0].status, ToolCallStatus::Unresolved);
}

#[tokio::test]
async fn transport_failure_drops_partial_turn() {
    let source = ScriptedSource::new(vec![
        Script::failing_after(&[message("yarım").as_str()]),
        Script::body(&[message("tam").as_str(), "data: [DONE]\n\n"]),
    ]);
    let mut chat = course_session(source);
    let mut watcher = Watcher::default();

    let result = chat.send_with("bir", &mut watcher).await;
    assert!(matches!(result, Err(SendError::Transport(TransportError::Stream(_)))));
    assert_eq!(chat.state(), SessionState::Error);
    assert_eq!(watcher.errors.len(), 1);
    assert!(watcher.completions.is_empty());
    assert!(chat.active_turn().is_none());
    let roles: Vec<_> = chat.transcript().turns().iter().map(ConversationTurn::role).collect();
    assert_eq!(roles, vec![Role::User]);

    chat.send("iki").await.unwrap();
    assert_eq!(chat.state(), SessionState::Idle);
    assert!(chat.last_error().is_none());
    assert_eq!(assistant_text(chat.transcript().last().unwrap()), "tam");
}

#[tokio::test]
async fn dropped_send_is_recovered_as_cancelled() {
    let source = ScriptedSource::new(vec![
        Script::hanging(&[message("kısmi").as_str()]),
        Script::body(&[message("yeni").as_str(), "data: [DONE]\n\n"]),
    ]);
    let mut chat = course_session(source);

    let timed_out = tokio::time::timeout(Duration::from_millis(50), chat.send("bir")).await;
    assert!(timed_out.is_err());
    assert_eq!(chat.active_turn().map(ActiveTurn::streamed_text), Some("kısmi"));
    assert_eq!(chat.state(), SessionState::Idle);
    assert!(!chat.cancel_handle().cancel());

    chat.send("iki").await.unwrap();
    let turns = chat.transcript().turns();
    assert_eq!(turns.len(), 4);
    assert_eq!(assistant_text(&turns[1]), "kısmi");
    assert_eq!(assistant_text(&turns[3]), "yeni");
}

#[tokio::test]
async fn cancel_before_the_stream_opens_commits_an_empty_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(message("geç"), "text/event-stream")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let config = ClientConfig {
        base_url: server.uri(),
        ..ClientConfig::default()
    };
    let transport = StreamTransport::new(&config).unwrap();
    let mut chat = ChatSession::new(transport, config, ChatContext::new(ChatTarget::course("1")));
    let mut watcher = Watcher {
        cancel_on_send: Some(chat.cancel_handle()),
        ..Watcher::default()
    };

    let outcome = tokio::time::timeout(Duration::from_secs(5), chat.send_with("x", &mut watcher))
        .await
        .expect("cancel should not wait for the response")
        .unwrap();

    assert_eq!(outcome.end, StreamEnd::Cancelled);
    assert_eq!(watcher.states, vec![SessionState::Sending, SessionState::Idle]);
    assert_eq!(watcher.completions, vec![StreamEnd::Cancelled]);
    assert!(watcher.errors.is_empty());
    assert_eq!(watcher.events, 0);

    assert_eq!(chat.state(), SessionState::Idle);
    assert!(chat.last_error().is_none());
    let turns = chat.transcript().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].id(), outcome.turn_id);
    assert_eq!(assistant_text(&turns[1]), "");
    assert!(!turns[1].is_streaming());
}

#[tokio::test]
async fn assistant_context_and_token_reach_the_request() {
    let source = ScriptedSource::new(vec![Script::body(&["data: [DONE]\n"])]);
    let context = ChatContext::new(ChatTarget::assistant())
        .with_profile(UserProfile {
            id: Some("7".to_string()),
            student_id: Some("210101001".to_string()),
            department_id: Some("3".to_string()),
        })
        .with_token("jwt-token");
    let mut chat = ChatSession::new(source.clone(), ClientConfig::default(), context);

    chat.send("Sınav ne zaman?").await.unwrap();
    let sent = &source.requests()[0];
    assert_eq!(sent.endpoint, "http://127.0.0.1:8000/api/chat");
    assert_eq!(sent.token.as_deref(), Some("jwt-token"));
    assert_eq!(sent.body["school"], "Izmir Bakircay Universitesi");
    assert_eq!(sent.body["student_id"], "210101001");
    assert_eq!(sent.body["thread_id"], json!(chat.thread_id().as_str()));
}

#[tokio::test]
async fn tool_durations_follow_the_clock() {
    let start = record("tool_start", r#""data":{"name":"search"}"#);
    let source = ScriptedSource::new(vec![Script::hanging(&[start.as_str()])]);
    let clock = source.clock.clone();
    let mut chat = course_session(source);

    // Leave the send hanging after the start so the turn stays active.
    let _ = tokio::time::timeout(Duration::from_millis(20), chat.send("bir")).await;
    let turn = chat.active_turn().cloned().unwrap();
    assert_eq!(turn.content().tool_calls().len(), 1);

    clock.advance(Duration::from_millis(1500));
    let response = StreamEvent::parse(
        r#"{"type":"tool_response","data":{"name":"search","result":"ok"}}"#,
        clock.as_ref(),
    )
    .unwrap();
    let turn = turn.apply_event(response);
    assert_eq!(turn.content().tool_calls()[0].duration_ms(), Some(1500));
}

// =============================================================================
// HTTP end to end
// =============================================================================

#[tokio::test]
async fn end_to_end_over_http() {
    let server = MockServer::start().await;
    let body = [
        record("agent_decision", r#""data":{"agent_name":"course_agent"}"#),
        record("tool_start", r#""data":{"id":"1","name":"search"}"#),
        message("İçerik "),
        message("şu şekildedir."),
        record("tool_response", r#""data":{"id":"1","name":"search","result":"ok"}"#),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat();
    Mock::given(method("POST"))
        .and(path("/api/chat/course"))
        .and(body_json(json!({
            "message": "Bu dersin içeriği nedir?",
            "thread_id": "t1",
            "course_id": "EEM-204",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig {
        base_url: server.uri(),
        ..ClientConfig::default()
    };
    let transport = StreamTransport::new(&config).unwrap();
    let mut chat = ChatSession::new(
        transport,
        config,
        ChatContext::new(ChatTarget::course("EEM-204")),
    )
    .with_thread_id("t1".parse().unwrap());

    let mut watcher = Watcher::default();
    let outcome = chat
        .send_with("Bu dersin içeriği nedir?", &mut watcher)
        .await
        .unwrap();

    assert_eq!(outcome.end, StreamEnd::Done);
    assert_eq!(
        watcher.states,
        vec![
            SessionState::Sending,
            SessionState::Streaming,
            SessionState::Idle
        ]
    );
    assert_eq!(watcher.completions.len(), 1);

    let turn = chat.transcript().last().unwrap();
    assert_eq!(assistant_text(turn), "İçerik şu şekildedir.");
    assert!(!turn.is_streaming());
    let calls = turn.assistant().unwrap().tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool_name, "search");
    assert!(calls[0].duration_ms().is_some());

    let rows = turn_view(turn);
    assert_eq!(rows.len(), 2);
    assert!(matches!(
        &rows[0],
        EventView::AgentDecision { agent_name } if agent_name == "course_agent"
    ));
}

#[tokio::test]
async fn http_error_status_surfaces_to_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let config = ClientConfig {
        base_url: server.uri(),
        ..ClientConfig::default()
    };
    let transport = StreamTransport::new(&config).unwrap();
    let mut chat = ChatSession::new(transport, config, ChatContext::new(ChatTarget::probe()));

    let result = chat.send("x").await;
    assert!(matches!(
        result,
        Err(SendError::Transport(TransportError::Status { status: 502, .. }))
    ));
    assert_eq!(chat.last_error(), Some("HTTP error! status: 502"));
    assert_eq!(chat.transcript().len(), 1);
}
