//! Presentation view-model for assistant turns.
//!
//! Turns keep every structural event, matched `tool_response`s included.
//! [`turn_view`] is where responses get folded into their starts for
//! display.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::assembler::{ConversationTurn, ToolCallStatus};
use crate::event::EventKind;
use crate::format::ToolCategory;

/// Display status of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallDisplay {
    /// Waiting for a response while the stream is open.
    Running,
    /// Response received.
    Completed {
        /// Tool output.
        result: Value,
        /// Wait between start and response.
        duration_ms: u64,
    },
    /// The turn ended without a response.
    Unresolved,
}

/// A `tool_start` enriched with its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallView {
    /// Backend id, if any.
    pub call_id: Option<String>,
    /// Tool name.
    pub tool_name: String,
    /// Tool family.
    pub category: ToolCategory,
    /// Arguments.
    pub arguments: Map<String, Value>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Outcome.
    pub status: ToolCallDisplay,
}

/// One renderable row of an assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub enum EventView {
    /// A tool invocation.
    ToolCall(ToolCallView),
    /// A response no start was found for.
    StandaloneResponse {
        /// Backend id, if any.
        call_id: Option<String>,
        /// Tool name.
        tool_name: String,
        /// Tool output.
        result: Value,
    },
    /// The backend picked an agent.
    AgentDecision {
        /// Agent name.
        agent_name: String,
    },
    /// An event this client cannot interpret.
    Opaque {
        /// Wire `type`.
        kind: String,
        /// Pretty-printed record.
        json: String,
    },
}

/// Build display rows for a turn, in event order. User turns have none.
#[must_use]
pub fn turn_view(turn: &ConversationTurn) -> Vec<EventView> {
    let Some(content) = turn.assistant() else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for (index, event) in content.structural_events().iter().enumerate() {
        match &event.kind {
            EventKind::ToolStart(start) => {
                let status = match content.call_started_at(index).map(|c| &c.status) {
                    Some(ToolCallStatus::Completed {
                        result,
                        duration_ms,
                    }) => ToolCallDisplay::Completed {
                        result: result.clone(),
                        duration_ms: *duration_ms,
                    },
                    Some(ToolCallStatus::Unresolved) => ToolCallDisplay::Unresolved,
                    Some(ToolCallStatus::Pending) | None if content.is_streaming() => {
                        ToolCallDisplay::Running
                    }
                    Some(ToolCallStatus::Pending) | None => ToolCallDisplay::Unresolved,
                };
                rows.push(EventView::ToolCall(ToolCallView {
                    call_id: start.call_id.clone(),
                    tool_name: start.tool_name.clone(),
                    category: ToolCategory::from_tool_name(&start.tool_name),
                    arguments: start.arguments.clone(),
                    started_at: event.timestamp,
                    status,
                }));
            }
            EventKind::ToolResponse(response) => {
                if content.call_resolved_at(index).is_none() {
                    rows.push(EventView::StandaloneResponse {
                        call_id: response.call_id.clone(),
                        tool_name: response.tool_name.clone(),
                        result: response.result.clone(),
                    });
                }
            }
            EventKind::AgentDecision { agent_name } => {
                rows.push(EventView::AgentDecision {
                    agent_name: agent_name.clone(),
                });
            }
            EventKind::Other { kind, payload } => {
                let json = serde_json::to_string_pretty(payload)
                    .unwrap_or_else(|_| payload.to_string());
                rows.push(EventView::Opaque {
                    kind: kind.clone(),
                    json,
                });
            }
            EventKind::Message { .. } => {}
        }
    }
    rows
}
