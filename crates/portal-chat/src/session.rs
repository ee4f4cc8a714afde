//! Chat session controller.
//!
//! A [`ChatSession`] owns the transcript, the thread id and the in-flight
//! assistant turn. `send` takes `&mut self`, so a session can never have two
//! requests in flight; the only state shared with other tasks is the
//! [`CancelHandle`].
//!
//! State machine:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Idle            (done, closed or cancelled)
//!                             \-> Error -> Idle   (transport failure)
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use portal_chat_core::{Clock, SystemClock, ThreadId, TurnId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::{ActiveTurn, ConversationTurn, Transcript};
use crate::config::{ClientConfig, ThreadPolicy};
use crate::context::{ChatContext, ChatRequest, ChatTarget};
use crate::event::StreamEvent;
use crate::transport::{EventSource, StreamEnd, StreamRequest, TransportError};

/// Error type for [`ChatSession::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message is empty or whitespace only.
    #[error("message is empty")]
    EmptyMessage,

    /// The request failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Ready to send.
    #[default]
    Idle,
    /// Request issued, stream not open yet.
    Sending,
    /// Receiving events.
    Streaming,
    /// The last send failed; see [`ChatSession::last_error`].
    Error,
}

impl SessionState {
    /// Whether a send is in flight.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

/// Result of a send that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Id of the committed assistant turn.
    pub turn_id: TurnId,
    /// How the stream ended.
    pub end: StreamEnd,
}

/// Callbacks fired while a send runs. Every method defaults to a no-op.
pub trait SessionObserver {
    /// The controller changed state.
    fn on_state(&mut self, _state: SessionState) {}

    /// An event was folded into the active turn.
    fn on_event(&mut self, _event: &StreamEvent, _turn: &ActiveTurn) {}

    /// The assistant turn was finalized and committed. Fires at most once
    /// per send.
    fn on_complete(&mut self, _turn: &ConversationTurn, _end: StreamEnd) {}

    /// The send failed. Never fired for cancellation.
    fn on_error(&mut self, _message: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Cloneable handle that cancels the in-flight send of a session.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl CancelHandle {
    /// Cancel the in-flight send. Returns `false` if nothing was in flight.
    pub fn cancel(&self) -> bool {
        match self.slot.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot.lock() = Some(token.clone());
        token
    }

    fn disarm(&self) {
        self.slot.lock().take();
    }

    fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Disarms the session's [`CancelHandle`] when a send ends, including when
/// the send future is dropped mid-stream.
struct ArmedSend {
    handle: CancelHandle,
}

impl Drop for ArmedSend {
    fn drop(&mut self) {
        if let Some(token) = self.handle.slot.lock().take() {
            token.cancel();
        }
    }
}

/// One conversation with the chat backend.
#[derive(Debug)]
pub struct ChatSession<S> {
    source: S,
    config: ClientConfig,
    context: ChatContext,
    clock: Arc<dyn Clock>,
    thread_id: ThreadId,
    transcript: Transcript,
    active: Option<ActiveTurn>,
    state: SessionState,
    last_error: Option<String>,
    cancel: CancelHandle,
}

impl<S: EventSource> ChatSession<S> {
    /// Open a session with a fresh thread id.
    pub fn new(source: S, config: ClientConfig, context: ChatContext) -> Self {
        let thread_id = ThreadId::generate();
        info!(thread_id = %thread_id, target = context.target.label(), "Chat session opened");
        Self {
            source,
            config,
            context,
            clock: Arc::new(SystemClock::new()),
            thread_id,
            transcript: Transcript::new(),
            active: None,
            state: SessionState::Idle,
            last_error: None,
            cancel: CancelHandle::default(),
        }
    }

    /// Replace the clock used for turn timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a caller-chosen thread id.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Current thread id.
    #[must_use]
    pub const fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Finalized turns.
    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The turn being streamed, if any.
    #[must_use]
    pub const fn active_turn(&self) -> Option<&ActiveTurn> {
        self.active.as_ref()
    }

    /// Controller state.
    ///
    /// A send whose future was dropped reports [`SessionState::Idle`]; its
    /// partial turn is committed by the next `send` or `reset_thread`.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.state.is_busy() && !self.cancel.is_armed() {
            return SessionState::Idle;
        }
        self.state
    }

    /// Message of the last failed send, cleared by the next send.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Request context.
    #[must_use]
    pub const fn context(&self) -> &ChatContext {
        &self.context
    }

    /// Full URL requests go to.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.config.endpoint(self.context.target.path(&self.config))
    }

    /// Handle for cancelling from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel the in-flight send, if any.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Leave the error state without sending.
    pub fn clear_error(&mut self) {
        if self.state == SessionState::Error {
            self.state = SessionState::Idle;
            self.last_error = None;
        }
    }

    /// Start a new conversation on a different surface.
    ///
    /// Mints a new thread id, clears the transcript and drops any stale
    /// in-flight turn.
    pub fn switch_context(&mut self, target: ChatTarget) {
        self.context.target = target;
        self.reset_thread();
    }

    /// Start a new conversation on the same surface.
    pub fn reset_thread(&mut self) {
        self.recover_stale_turn();
        self.thread_id = ThreadId::generate();
        self.transcript.clear();
        self.state = SessionState::Idle;
        self.last_error = None;
        info!(
            thread_id = %self.thread_id,
            target = self.context.target.label(),
            "Conversation reset"
        );
    }

    /// Send a message and stream the answer.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::EmptyMessage`] for blank input (no state
    /// changes), or [`SendError::Transport`] when the request or the stream
    /// fails; the partial answer is then dropped.
    pub async fn send(&mut self, text: &str) -> Result<TurnOutcome, SendError> {
        self.send_with(text, &mut NoopObserver).await
    }

    /// [`ChatSession::send`] with progress callbacks.
    ///
    /// # Errors
    ///
    /// See [`ChatSession::send`].
    pub async fn send_with(
        &mut self,
        text: &str,
        observer: &mut dyn SessionObserver,
    ) -> Result<TurnOutcome, SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyMessage);
        }

        self.recover_stale_turn();
        self.last_error = None;
        if self.config.thread_policy == ThreadPolicy::PerMessage {
            self.thread_id = ThreadId::generate();
        }

        self.transcript
            .commit(ConversationTurn::user(text, self.clock.now()));

        let turn_id = TurnId::generate();
        self.active = Some(ActiveTurn::new(turn_id, self.clock.now()));
        let cancel = self.cancel.arm();
        let _armed = ArmedSend {
            handle: self.cancel.clone(),
        };
        self.set_state(SessionState::Sending, observer);

        info!(thread_id = %self.thread_id, turn_id = %turn_id, "Sending chat message");

        let request = ChatRequest::new(text, self.thread_id.clone(), &self.context);
        let endpoint = self.endpoint();
        let opened = self
            .source
            .open(
                StreamRequest {
                    endpoint: &endpoint,
                    body: &request,
                    bearer_token: self.context.token.as_deref(),
                },
                cancel,
            )
            .await;

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(e, observer)),
        };

        if stream.end().is_none() {
            self.set_state(SessionState::Streaming, observer);
        }

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => return Err(self.fail(e, observer)),
            };
            let Some(turn) = self.active.take() else {
                break;
            };
            let turn = turn.apply_event(event.clone());
            observer.on_event(&event, &turn);
            self.active = Some(turn);
        }

        let end = stream.end().unwrap_or(StreamEnd::Closed);
        self.cancel.disarm();
        self.complete(end, observer);
        Ok(TurnOutcome { turn_id, end })
    }

    fn set_state(&mut self, state: SessionState, observer: &mut dyn SessionObserver) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Session state changed");
            self.state = state;
            observer.on_state(state);
        }
    }

    /// Finalize and commit the active turn. A no-op if there is none.
    fn complete(&mut self, end: StreamEnd, observer: &mut dyn SessionObserver) {
        let Some(active) = self.active.take() else {
            return;
        };
        let turn = active.finalize();
        if self.transcript.commit(turn.clone()) {
            let calls = turn.assistant().map_or(0, |a| a.tool_calls().len());
            info!(
                thread_id = %self.thread_id,
                turn_id = %turn.id(),
                end = ?end,
                tool_calls = calls,
                "Assistant turn finished"
            );
            observer.on_complete(&turn, end);
        }
        self.set_state(SessionState::Idle, observer);
    }

    fn fail(&mut self, error: TransportError, observer: &mut dyn SessionObserver) -> SendError {
        self.cancel.disarm();
        if let Some(turn) = self.active.take() {
            warn!(
                thread_id = %self.thread_id,
                turn_id = %turn.id(),
                error = %error,
                "Dropping partial assistant turn"
            );
        }
        let message = error.to_string();
        self.last_error = Some(message.clone());
        self.set_state(SessionState::Error, observer);
        observer.on_error(&message);
        SendError::Transport(error)
    }

    /// A send future dropped mid-stream leaves its turn behind; keep what
    /// arrived, as a cancellation would.
    fn recover_stale_turn(&mut self) {
        if let Some(turn) = self.active.as_ref() {
            warn!(turn_id = %turn.id(), "Finalizing abandoned turn as cancelled");
            self.cancel.disarm();
            self.complete(StreamEnd::Cancelled, &mut NoopObserver);
        }
    }
}
