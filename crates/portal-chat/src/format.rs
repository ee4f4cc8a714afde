//! Display helpers shared by chat surfaces.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Default length for [`truncate`] in event summaries.
pub const SUMMARY_LENGTH: usize = 100;

/// Length a string value is cut to by [`json_summary`].
pub const JSON_STRING_PREVIEW: usize = 80;

/// `"350ms"` below a second, `"1.2s"` above, empty for zero or unknown.
///
/// Seconds are rounded to tenths with ties going up (`1250` is `"1.3s"`).
#[must_use]
pub fn format_duration(duration_ms: Option<u64>) -> String {
    match duration_ms {
        None | Some(0) => String::new(),
        Some(ms) if ms < 1000 => format!("{ms}ms"),
        Some(ms) => {
            let tenths = ms.saturating_add(50) / 100;
            format!("{}.{}s", tenths / 10, tenths % 10)
        }
    }
}

/// Coarse age of `then` relative to `now`: `"just now"`, `"12s ago"`,
/// `"3m ago"`, `"2h ago"`, `"4d ago"`.
#[must_use]
pub fn format_relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    if seconds < 1 {
        return "just now".to_string();
    }
    if seconds < 60 {
        return format!("{seconds}s ago");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    format!("{}d ago", hours / 24)
}

/// Cut `text` to at most `max_chars` characters, appending `...` if cut.
#[must_use]
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}

/// One-line shape summary of a JSON value.
#[must_use]
pub fn json_summary(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("Array ({} items)", items.len()),
        Value::Object(map) if map.is_empty() => "{}".to_string(),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            if keys.len() <= 3 {
                format!("{{ {} }}", keys.join(", "))
            } else {
                format!("{{ {}, ... }} ({} keys)", keys[..3].join(", "), keys.len())
            }
        }
        Value::String(s) => truncate(s, JSON_STRING_PREVIEW),
        other => other.to_string(),
    }
}

/// Broad family of a tool, guessed from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCategory {
    /// Search or query tools.
    Search,
    /// Database access.
    Database,
    /// Outbound HTTP calls.
    Api,
    /// Document or file readers.
    Document,
    /// Arithmetic.
    Calculate,
    /// Code execution.
    Code,
    /// Anything else.
    Generic,
}

impl ToolCategory {
    /// Classify by case-insensitive substring of the tool name.
    #[must_use]
    pub fn from_tool_name(name: &str) -> Self {
        let name = name.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        if has(&["search", "query"]) {
            Self::Search
        } else if has(&["database", "db", "sql"]) {
            Self::Database
        } else if has(&["api", "http", "fetch"]) {
            Self::Api
        } else if has(&["document", "file", "read"]) {
            Self::Document
        } else if has(&["calculate", "math", "compute"]) {
            Self::Calculate
        } else if has(&["code", "execute", "run"]) {
            Self::Code
        } else {
            Self::Generic
        }
    }

    /// Terminal glyph.
    #[must_use]
    pub const fn icon(self) -> &'static str {
        match self {
            Self::Search => "🔍",
            Self::Database => "🗄",
            Self::Api => "🌐",
            Self::Document => "📄",
            Self::Calculate => "🧮",
            Self::Code => "💻",
            Self::Generic => "🔧",
        }
    }
}
