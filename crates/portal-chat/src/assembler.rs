//! Folding stream events into conversation turns.
//!
//! An [`ActiveTurn`] is the in-flight assistant answer. Each event is folded
//! in with [`ActiveTurn::apply_event`], which consumes the turn and returns
//! the updated one. [`ActiveTurn::finalize`] turns it into an immutable
//! [`ConversationTurn`], which a [`Transcript`] accepts exactly once.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use portal_chat_core::TurnId;
use serde_json::{Map, Value};

use crate::correlator::{CallKey, ToolCallCorrelator};
use crate::event::{EventKind, StreamEvent};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The student.
    User,
    /// The backend assistant.
    Assistant,
}

/// Resolution state of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallStatus {
    /// Started, no response yet, stream still open.
    Pending,
    /// Answered.
    Completed {
        /// Result carried by the response.
        result: Value,
        /// Wait between start and response.
        duration_ms: u64,
    },
    /// The turn ended before any response arrived.
    Unresolved,
}

/// A tool invocation as seen from its turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    /// Correlator identity.
    pub key: CallKey,
    /// Tool name.
    pub tool_name: String,
    /// Arguments from the start event.
    pub arguments: Map<String, Value>,
    /// Timestamp of the start event.
    pub started_at: DateTime<Utc>,
    /// Index of the `tool_start` in the structural events.
    pub start_index: usize,
    /// Index of the matched `tool_response`, if any.
    pub response_index: Option<usize>,
    /// Current status.
    pub status: ToolCallStatus,
}

impl ToolCallRecord {
    /// The backend id, if the start carried one.
    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        self.key.call_id()
    }

    /// Wait in milliseconds once completed.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        match self.status {
            ToolCallStatus::Completed { duration_ms, .. } => Some(duration_ms),
            _ => None,
        }
    }
}

/// Content of an assistant turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssistantContent {
    streamed_text: String,
    structural_events: Vec<StreamEvent>,
    tool_calls: Vec<ToolCallRecord>,
    is_streaming: bool,
}

impl AssistantContent {
    /// Concatenated `message` fragments, in arrival order.
    #[must_use]
    pub fn streamed_text(&self) -> &str {
        &self.streamed_text
    }

    /// Every non-message event, in arrival order.
    #[must_use]
    pub fn structural_events(&self) -> &[StreamEvent] {
        &self.structural_events
    }

    /// Tool invocations, in start order.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    /// Whether the stream for this turn is still open.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// The call started by the structural event at `index`.
    #[must_use]
    pub fn call_started_at(&self, index: usize) -> Option<&ToolCallRecord> {
        self.tool_calls.iter().find(|c| c.start_index == index)
    }

    /// The call resolved by the structural event at `index`.
    #[must_use]
    pub fn call_resolved_at(&self, index: usize) -> Option<&ToolCallRecord> {
        self.tool_calls
            .iter()
            .find(|c| c.response_index == Some(index))
    }
}

/// Body of a [`ConversationTurn`].
#[derive(Debug, Clone, PartialEq)]
pub enum TurnContent {
    /// A student message.
    User {
        /// The message text.
        text: String,
    },
    /// An assistant answer.
    Assistant(AssistantContent),
}

/// One entry of the conversation.
///
/// Only the assembler can build assistant turns, and no accessor hands out
/// mutable state, so a finalized turn cannot change.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    id: TurnId,
    created_at: DateTime<Utc>,
    content: TurnContent,
}

impl ConversationTurn {
    /// Create a user turn.
    #[must_use]
    pub fn user(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: TurnId::generate(),
            created_at,
            content: TurnContent::User { text: text.into() },
        }
    }

    /// Turn id.
    #[must_use]
    pub const fn id(&self) -> TurnId {
        self.id
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Who produced the turn.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self.content {
            TurnContent::User { .. } => Role::User,
            TurnContent::Assistant(_) => Role::Assistant,
        }
    }

    /// Turn body.
    #[must_use]
    pub const fn content(&self) -> &TurnContent {
        &self.content
    }

    /// The user text, for user turns.
    #[must_use]
    pub fn user_text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::User { text } => Some(text),
            TurnContent::Assistant(_) => None,
        }
    }

    /// The assistant content, for assistant turns.
    #[must_use]
    pub const fn assistant(&self) -> Option<&AssistantContent> {
        match &self.content {
            TurnContent::Assistant(content) => Some(content),
            TurnContent::User { .. } => None,
        }
    }

    /// Whether this is an assistant turn whose stream is still open.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        match &self.content {
            TurnContent::Assistant(content) => content.is_streaming,
            TurnContent::User { .. } => false,
        }
    }
}

// =============================================================================
// Active turn
// =============================================================================

/// The assistant turn currently being streamed.
#[derive(Debug, Clone)]
pub struct ActiveTurn {
    id: TurnId,
    created_at: DateTime<Utc>,
    content: AssistantContent,
    correlator: ToolCallCorrelator,
    calls_by_key: HashMap<CallKey, usize>,
}

impl ActiveTurn {
    /// Open an empty assistant turn.
    #[must_use]
    pub fn new(id: TurnId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            content: AssistantContent {
                is_streaming: true,
                ..AssistantContent::default()
            },
            correlator: ToolCallCorrelator::new(),
            calls_by_key: HashMap::new(),
        }
    }

    /// Turn id.
    #[must_use]
    pub const fn id(&self) -> TurnId {
        self.id
    }

    /// Content accumulated so far.
    #[must_use]
    pub const fn content(&self) -> &AssistantContent {
        &self.content
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn streamed_text(&self) -> &str {
        &self.content.streamed_text
    }

    /// The correlator tracking this turn's tool calls.
    #[must_use]
    pub const fn correlator(&self) -> &ToolCallCorrelator {
        &self.correlator
    }

    /// Fold one event into the turn.
    ///
    /// `message` content is appended to the text; every other event is
    /// appended to the structural events without reordering or
    /// deduplication. Tool events also update the correlator.
    #[must_use]
    pub fn apply_event(mut self, event: StreamEvent) -> Self {
        if let EventKind::Message { content } = &event.kind {
            self.content.streamed_text.push_str(content);
            return self;
        }

        let index = self.content.structural_events.len();
        match &event.kind {
            EventKind::ToolStart(start) => {
                let key = self.correlator.register_start(start, event.received_ms);
                let record = ToolCallRecord {
                    key: key.clone(),
                    tool_name: start.tool_name.clone(),
                    arguments: start.arguments.clone(),
                    started_at: event.timestamp,
                    start_index: index,
                    response_index: None,
                    status: ToolCallStatus::Pending,
                };
                self.calls_by_key.insert(key, self.content.tool_calls.len());
                self.content.tool_calls.push(record);
            }
            EventKind::ToolResponse(response) => {
                let outcome = self
                    .correlator
                    .register_response(response, event.received_ms);
                if let (Some(key), Some(duration_ms)) = (outcome.key, outcome.duration_ms) {
                    if let Some(record) = self
                        .calls_by_key
                        .get(&key)
                        .and_then(|&i| self.content.tool_calls.get_mut(i))
                    {
                        record.response_index = Some(index);
                        record.status = ToolCallStatus::Completed {
                            result: response.result.clone(),
                            duration_ms,
                        };
                    }
                }
            }
            _ => {}
        }
        self.content.structural_events.push(event);
        self
    }

    /// A read-only copy for rendering while the stream is open.
    #[must_use]
    pub fn snapshot(&self) -> ConversationTurn {
        ConversationTurn {
            id: self.id,
            created_at: self.created_at,
            content: TurnContent::Assistant(self.content.clone()),
        }
    }

    /// Close the turn. Calls still pending become unresolved for good.
    #[must_use]
    pub fn finalize(self) -> ConversationTurn {
        let mut content = self.content;
        content.is_streaming = false;
        for call in &mut content.tool_calls {
            if call.status == ToolCallStatus::Pending {
                call.status = ToolCallStatus::Unresolved;
            }
        }
        ConversationTurn {
            id: self.id,
            created_at: self.created_at,
            content: TurnContent::Assistant(content),
        }
    }
}

// =============================================================================
// Transcript
// =============================================================================

/// Append-only, ordered list of finalized turns.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
    ids: HashSet<TurnId>,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn unless one with the same id is already present.
    ///
    /// Returns `false` for a duplicate, and for a turn that is still
    /// streaming.
    pub fn commit(&mut self, turn: ConversationTurn) -> bool {
        if turn.is_streaming() || !self.ids.insert(turn.id) {
            return false;
        }
        self.turns.push(turn);
        true
    }

    /// Turns in order.
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Most recent turn.
    #[must_use]
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether there are no turns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.turns.clear();
        self.ids.clear();
    }
}
