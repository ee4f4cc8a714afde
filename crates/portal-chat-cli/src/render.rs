//! Terminal rendering of a streaming chat turn.
//!
//! Prose tokens are written inline as they arrive. Structural events go on
//! their own lines so they never split a word of the answer.

use std::io::Write;

use portal_chat::format::{format_duration, json_summary, truncate, ToolCategory};
use portal_chat::{
    turn_view, ActiveTurn, ConversationTurn, EventKind, EventView, SessionObserver, SessionState,
    StreamEnd, StreamEvent, ToolCallDisplay,
};
use serde_json::{Map, Value};

/// Longest compact argument list shown next to a tool name.
const ARGS_PREVIEW: usize = 60;

/// Format tool arguments for a one-line display.
///
/// Returns an empty string when there is nothing meaningful to show.
pub fn format_tool_args(args: &Map<String, Value>) -> String {
    if args.is_empty() {
        return String::new();
    }

    // A single string argument reads better bare: search "syllabus"
    if args.len() == 1 {
        if let Some(Value::String(s)) = args.values().next() {
            return format!("\"{}\"", truncate(s, ARGS_PREVIEW));
        }
    }

    let compact = serde_json::to_string(args).unwrap_or_default();
    truncate(&compact, ARGS_PREVIEW)
}

/// Format a tool result for display.
pub fn format_tool_result(result: &Value) -> String {
    match result {
        Value::Null => "OK".to_string(),
        Value::String(s) if s.trim().is_empty() => "OK".to_string(),
        Value::String(s) => truncate(s.trim(), portal_chat::format::SUMMARY_LENGTH),
        other => json_summary(other),
    }
}

/// Line printed when a structural event arrives.
pub fn event_line(event: &StreamEvent) -> Option<String> {
    match &event.kind {
        EventKind::Message { .. } => None,
        EventKind::ToolStart(start) => {
            let icon = ToolCategory::from_tool_name(&start.tool_name).icon();
            let args = format_tool_args(&start.arguments);
            Some(if args.is_empty() {
                format!("{icon} {}", start.tool_name)
            } else {
                format!("{icon} {} {args}", start.tool_name)
            })
        }
        EventKind::ToolResponse(response) => Some(format!(
            "↳ {}: {}",
            response.tool_name,
            format_tool_result(&response.result)
        )),
        EventKind::AgentDecision { agent_name } => Some(format!("🤖 Agent: {agent_name}")),
        EventKind::Other { kind, .. } => Some(format!("• {kind}")),
    }
}

/// Summary lines printed once a turn is finalized.
pub fn summary_lines(turn: &ConversationTurn, end: StreamEnd) -> Vec<String> {
    let mut lines: Vec<String> = turn_view(turn)
        .into_iter()
        .filter_map(|row| match row {
            EventView::ToolCall(call) => Some(match call.status {
                ToolCallDisplay::Completed { duration_ms, .. } => {
                    let took = format_duration(Some(duration_ms));
                    if took.is_empty() {
                        format!("✅ {}", call.tool_name)
                    } else {
                        format!("✅ {} ({took})", call.tool_name)
                    }
                }
                ToolCallDisplay::Running => format!("⏳ {}", call.tool_name),
                ToolCallDisplay::Unresolved => format!("⏳ {} (no response)", call.tool_name),
            }),
            EventView::StandaloneResponse { tool_name, .. } => {
                Some(format!("❔ {tool_name} (unmatched response)"))
            }
            EventView::Opaque { kind, json } => Some(format!("Unknown Event ({kind}):\n{json}")),
            EventView::AgentDecision { .. } => None,
        })
        .collect();

    if end == StreamEnd::Cancelled {
        lines.push("(cancelled)".to_string());
    }
    lines
}

/// Observer that writes a turn to a terminal as it streams.
pub struct TerminalObserver<W: Write> {
    out: W,
    at_line_start: bool,
}

impl<W: Write> TerminalObserver<W> {
    /// Create an observer writing to `out`.
    pub const fn new(out: W) -> Self {
        Self {
            out,
            at_line_start: true,
        }
    }

    /// Consume the observer and return the writer.
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if !self.at_line_start {
            let _ = writeln!(self.out);
        }
        let _ = writeln!(self.out, "{text}");
        self.at_line_start = true;
    }
}

impl<W: Write> SessionObserver for TerminalObserver<W> {
    fn on_state(&mut self, state: SessionState) {
        if state == SessionState::Sending {
            tracing::debug!("Waiting for the stream to open");
        }
    }

    fn on_event(&mut self, event: &StreamEvent, _turn: &ActiveTurn) {
        if let EventKind::Message { content } = &event.kind {
            let _ = write!(self.out, "{content}");
            let _ = self.out.flush();
            self.at_line_start = content.ends_with('\n');
            return;
        }
        if let Some(line) = event_line(event) {
            self.line(&line);
        }
    }

    fn on_complete(&mut self, turn: &ConversationTurn, end: StreamEnd) {
        if !self.at_line_start {
            let _ = writeln!(self.out);
            self.at_line_start = true;
        }
        for line in summary_lines(turn, end) {
            self.line(&line);
        }
        let _ = self.out.flush();
    }

    fn on_error(&mut self, message: &str) {
        if !self.at_line_start {
            let _ = writeln!(self.out);
            self.at_line_start = true;
        }
        eprintln!("Error: {message}");
    }
}
