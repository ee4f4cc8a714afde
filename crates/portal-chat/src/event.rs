//! Wire events of the chat stream.
//!
//! Every `data:` record carries one JSON object of the shape
//!
//! ```text
//! {"type": "message" | "tool_start" | "tool_response" | "agent_decision" | ...,
//!  "timestamp"?: ISO-8601, "content"?: string,
//!  "data"?: {"id"?, "name", "args"?, "result"?, "agent_name"?}}
//! ```
//!
//! Records are first read as a generic JSON value and then narrowed to a
//! typed [`EventKind`]. A record whose type is unknown, or whose payload
//! does not fit the expected shape, is kept as [`EventKind::Other`] so it can
//! still be shown to the user.

use chrono::{DateTime, NaiveDateTime, Utc};
use portal_chat_core::Clock;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Error raised when a single record cannot be read at all.
///
/// The transport logs and skips these; they never end a stream.
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    /// The payload is not valid JSON.
    #[error("malformed event JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is valid JSON but not an object with a string `type`.
    #[error("event record has no \"type\" field")]
    MissingType,
}

/// One decoded event of the chat stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Server-assigned creation time, or the time the client decoded it.
    pub timestamp: DateTime<Utc>,
    /// Monotonic milliseconds at which the client decoded the record.
    pub received_ms: u64,
    /// What happened.
    pub kind: EventKind,
}

/// The typed payload of a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A token or fragment of assistant prose.
    Message {
        /// Text to append to the streamed answer.
        content: String,
    },
    /// The backend started a tool invocation.
    ToolStart(ToolStart),
    /// A tool invocation finished.
    ToolResponse(ToolResponse),
    /// The backend routed the request to an agent.
    AgentDecision {
        /// Name of the chosen agent.
        agent_name: String,
    },
    /// Any record this client does not understand, kept verbatim.
    Other {
        /// Value of the record's `type` field.
        kind: String,
        /// The whole record as received.
        payload: Value,
    },
}

/// Payload of a `tool_start` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolStart {
    /// Correlation id, when the backend sends one.
    pub call_id: Option<String>,
    /// Tool name.
    pub tool_name: String,
    /// Tool arguments.
    pub arguments: Map<String, Value>,
}

/// Payload of a `tool_response` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    /// Correlation id, when the backend sends one.
    pub call_id: Option<String>,
    /// Tool name.
    pub tool_name: String,
    /// Tool output; plain strings stay JSON strings.
    pub result: Value,
}

// =============================================================================
// Wire shapes
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct WireData {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Option<Map<String, Value>>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    agent_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(serde_json::Number),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

impl StreamEvent {
    /// Create an event stamped with the given times.
    #[must_use]
    pub const fn new(kind: EventKind, timestamp: DateTime<Utc>, received_ms: u64) -> Self {
        Self {
            timestamp,
            received_ms,
            kind,
        }
    }

    /// Decode one `data:` payload.
    ///
    /// Missing or unreadable timestamps fall back to `clock.now()`.
    ///
    /// # Errors
    ///
    /// Returns [`EventParseError`] when the payload is not JSON or carries no
    /// string `type`.
    pub fn parse(payload: &str, clock: &dyn Clock) -> Result<Self, EventParseError> {
        let value: Value = serde_json::from_str(payload)?;
        let received_ms = clock.monotonic_ms();

        let Some(record) = value.as_object() else {
            return Err(EventParseError::MissingType);
        };
        let Some(kind_name) = record.get("type").and_then(Value::as_str) else {
            return Err(EventParseError::MissingType);
        };

        let timestamp = record
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(|| clock.now());

        let kind = EventKind::from_record(kind_name, record)
            .unwrap_or_else(|| EventKind::Other {
                kind: kind_name.to_string(),
                payload: value.clone(),
            });

        Ok(Self {
            timestamp,
            received_ms,
            kind,
        })
    }

    /// The wire `type` of this event.
    #[must_use]
    pub fn kind_name(&self) -> &str {
        self.kind.name()
    }

    /// Render the event back to its wire JSON shape.
    #[must_use]
    pub fn to_json(&self) -> Value {
        if let EventKind::Other { payload, .. } = &self.kind {
            return payload.clone();
        }

        let mut record = Map::new();
        record.insert("type".into(), Value::from(self.kind_name()));
        record.insert("timestamp".into(), Value::from(self.timestamp.to_rfc3339()));
        match &self.kind {
            EventKind::Message { content } => {
                record.insert("content".into(), Value::from(content.as_str()));
            }
            EventKind::ToolStart(start) => {
                let mut data = Map::new();
                if let Some(id) = &start.call_id {
                    data.insert("id".into(), Value::from(id.as_str()));
                }
                data.insert("name".into(), Value::from(start.tool_name.as_str()));
                data.insert("args".into(), Value::Object(start.arguments.clone()));
                record.insert("data".into(), Value::Object(data));
            }
            EventKind::ToolResponse(response) => {
                let mut data = Map::new();
                if let Some(id) = &response.call_id {
                    data.insert("id".into(), Value::from(id.as_str()));
                }
                data.insert("name".into(), Value::from(response.tool_name.as_str()));
                data.insert("result".into(), response.result.clone());
                record.insert("data".into(), Value::Object(data));
            }
            EventKind::AgentDecision { agent_name } => {
                let mut data = Map::new();
                data.insert("agent_name".into(), Value::from(agent_name.as_str()));
                record.insert("data".into(), Value::Object(data));
            }
            EventKind::Other { .. } => {}
        }
        Value::Object(record)
    }
}

impl EventKind {
    /// The wire `type` string.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Message { .. } => "message",
            Self::ToolStart(_) => "tool_start",
            Self::ToolResponse(_) => "tool_response",
            Self::AgentDecision { .. } => "agent_decision",
            Self::Other { kind, .. } => kind,
        }
    }

    /// Whether this is a prose fragment rather than a structural event.
    #[must_use]
    pub const fn is_message(&self) -> bool {
        matches!(self, Self::Message { .. })
    }

    /// Narrow a known record type; `None` means "keep it opaque".
    fn from_record(kind: &str, record: &Map<String, Value>) -> Option<Self> {
        match kind {
            "message" => {
                let content = record.get("content")?.as_str()?;
                Some(Self::Message {
                    content: content.to_string(),
                })
            }
            "tool_start" => {
                let data = wire_data(record)?;
                Some(Self::ToolStart(ToolStart {
                    call_id: data.id.map(WireId::into_string),
                    tool_name: data.name?,
                    arguments: data.args.unwrap_or_default(),
                }))
            }
            "tool_response" => {
                let data = wire_data(record)?;
                Some(Self::ToolResponse(ToolResponse {
                    call_id: data.id.map(WireId::into_string),
                    tool_name: data.name?,
                    result: data.result.unwrap_or(Value::Null),
                }))
            }
            "agent_decision" => {
                let agent_name = wire_data(record)
                    .and_then(|data| data.agent_name)
                    .or_else(|| {
                        record
                            .get("agent_name")
                            .and_then(Value::as_str)
                            .map(String::from)
                    })?;
                Some(Self::AgentDecision { agent_name })
            }
            _ => None,
        }
    }
}

fn wire_data(record: &Map<String, Value>) -> Option<WireData> {
    let data = record.get("data")?;
    match WireData::deserialize(data) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::debug!(error = %e, "Event data has unexpected shape");
            None
        }
    }
}

/// Parse RFC 3339, or an offset-less ISO-8601 stamp read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
