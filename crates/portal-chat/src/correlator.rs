//! Tool-call correlator: pairs `tool_response` events with their starts.
//!
//! Matching order for a response:
//!
//! 1. the pending call whose id equals the response's `call_id`;
//! 2. otherwise the oldest pending call with the same tool name.
//!
//! The second rule is a best-effort heuristic for backends that omit ids.
//! With two same-named calls in flight at once it can pair a response with
//! the wrong start; nothing here tries to guess better than first-in,
//! first-out per tool name.
//!
//! Only pending calls are ever consulted. A resolved call never absorbs a
//! later response, and a fresh start with the name of a completed call is
//! an independent invocation.

use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::event::{ToolResponse, ToolStart};

/// Identity of one tracked invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallKey {
    /// Id assigned by the backend.
    Remote(String),
    /// Local sequence number for a start that arrived without an id.
    Local(u64),
}

impl CallKey {
    /// The backend id, if this call had one.
    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Local(_) => None,
        }
    }
}

/// A started, not yet answered invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    /// Tool name.
    pub tool_name: String,
    /// Arguments from the start event.
    pub arguments: Map<String, Value>,
    /// Monotonic milliseconds at registration.
    pub started_ms: u64,
}

/// A resolved invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCall {
    /// Tool name.
    pub tool_name: String,
    /// Result carried by the response.
    pub result: Value,
    /// Wait between start and response.
    pub duration_ms: u64,
}

/// Outcome of [`ToolCallCorrelator::register_response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Whether a pending call was resolved.
    pub matched: bool,
    /// Wait in milliseconds; `None` on a miss.
    pub duration_ms: Option<u64>,
    /// The call that was resolved.
    pub key: Option<CallKey>,
}

impl Correlation {
    const fn miss() -> Self {
        Self {
            matched: false,
            duration_ms: None,
            key: None,
        }
    }
}

/// Tracks outstanding tool invocations of one assistant turn.
#[derive(Debug, Clone, Default)]
pub struct ToolCallCorrelator {
    pending: HashMap<CallKey, PendingCall>,
    order: VecDeque<CallKey>,
    completed: HashMap<CallKey, CompletedCall>,
    next_local: u64,
}

impl ToolCallCorrelator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an invocation.
    ///
    /// A start reusing the id of a call that is still pending replaces it
    /// and restarts its timer.
    pub fn register_start(&mut self, start: &ToolStart, at_ms: u64) -> CallKey {
        let key = match &start.call_id {
            Some(id) => CallKey::Remote(id.clone()),
            None => {
                let key = CallKey::Local(self.next_local);
                self.next_local += 1;
                key
            }
        };

        if self.pending.contains_key(&key) {
            debug!(
                call_id = ?key.call_id(),
                tool = %start.tool_name,
                "Tool call id reused, replacing pending entry"
            );
            self.order.retain(|k| k != &key);
        }

        self.pending.insert(
            key.clone(),
            PendingCall {
                tool_name: start.tool_name.clone(),
                arguments: start.arguments.clone(),
                started_ms: at_ms,
            },
        );
        self.order.push_back(key.clone());
        key
    }

    /// Resolve a response against the pending set.
    pub fn register_response(&mut self, response: &ToolResponse, at_ms: u64) -> Correlation {
        let by_id = response
            .call_id
            .as_ref()
            .map(|id| CallKey::Remote(id.clone()))
            .filter(|key| self.pending.contains_key(key));

        let key = by_id.or_else(|| {
            let fallback = self
                .order
                .iter()
                .find(|k| {
                    self.pending
                        .get(*k)
                        .is_some_and(|p| p.tool_name == response.tool_name)
                })
                .cloned();
            if fallback.is_some() {
                debug!(
                    call_id = ?response.call_id,
                    tool = %response.tool_name,
                    "Tool response matched by name"
                );
            }
            fallback
        });

        let Some(key) = key else {
            warn!(
                call_id = ?response.call_id,
                tool = %response.tool_name,
                "Tool response has no pending call"
            );
            return Correlation::miss();
        };

        let Some(call) = self.pending.remove(&key) else {
            return Correlation::miss();
        };
        self.order.retain(|k| k != &key);

        let duration_ms = at_ms.saturating_sub(call.started_ms);
        debug!(
            call_id = ?key.call_id(),
            tool = %call.tool_name,
            duration_ms,
            "Tool call completed"
        );

        self.completed.insert(
            key.clone(),
            CompletedCall {
                tool_name: call.tool_name,
                result: response.result.clone(),
                duration_ms,
            },
        );

        Correlation {
            matched: true,
            duration_ms: Some(duration_ms),
            key: Some(key),
        }
    }

    /// Whether the call with this backend id is still pending.
    #[must_use]
    pub fn is_pending(&self, call_id: &str) -> bool {
        self.pending
            .contains_key(&CallKey::Remote(call_id.to_string()))
    }

    /// Whether the call with this key is still pending.
    #[must_use]
    pub fn is_key_pending(&self, key: &CallKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Look up a resolved call by backend id.
    #[must_use]
    pub fn lookup_completed(&self, call_id: &str) -> Option<&CompletedCall> {
        self.completed.get(&CallKey::Remote(call_id.to_string()))
    }

    /// Look up a resolved call by key.
    #[must_use]
    pub fn lookup_key(&self, key: &CallKey) -> Option<&CompletedCall> {
        self.completed.get(key)
    }

    /// Pending calls, oldest first.
    pub fn pending_calls(&self) -> impl Iterator<Item = (&CallKey, &PendingCall)> {
        self.order
            .iter()
            .filter_map(|k| self.pending.get(k).map(|p| (k, p)))
    }

    /// Number of pending calls.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn start(id: Option<&str>, name: &str) -> ToolStart {
        ToolStart {
            call_id: id.map(String::from),
            tool_name: name.to_string(),
            arguments: Map::new(),
        }
    }

    fn response(id: Option<&str>, name: &str, result: Value) -> ToolResponse {
        ToolResponse {
            call_id: id.map(String::from),
            tool_name: name.to_string(),
            result,
        }
    }

    #[test]
    fn new_is_empty() {
        let correlator = ToolCallCorrelator::new();
        assert_eq!(correlator.pending_count(), 0);
    }

    // =========================================================================
    // Id matching
    // =========================================================================

    #[test]
    fn matches_by_id() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(Some("a"), "search"), 100);
        assert!(c.is_pending("a"));

        let outcome = c.register_response(&response(Some("a"), "search", json!("ok")), 350);
        assert!(outcome.matched);
        assert_eq!(outcome.duration_ms, Some(250));
        assert!(!c.is_pending("a"));

        let done = c.lookup_completed("a").unwrap();
        assert_eq!(done.tool_name, "search");
        assert_eq!(done.result, json!("ok"));
        assert_eq!(done.duration_ms, 250);
    }

    #[test]
    fn id_match_wins_over_older_same_name() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(Some("1"), "search"), 0);
        c.register_start(&start(Some("2"), "search"), 10);

        let outcome = c.register_response(&response(Some("2"), "search", json!(null)), 20);
        assert_eq!(outcome.key, Some(CallKey::Remote("2".to_string())));
        assert!(c.is_pending("1"));
    }

    #[test]
    fn duration_never_negative() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(Some("a"), "x"), 500);
        let outcome = c.register_response(&response(Some("a"), "x", json!(1)), 400);
        assert_eq!(outcome.duration_ms, Some(0));
    }

    #[test]
    fn register_same_id_replaces() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(Some("a"), "search"), 0);
        c.register_start(&start(Some("a"), "search"), 40);
        assert_eq!(c.pending_count(), 1);

        let outcome = c.register_response(&response(Some("a"), "search", json!(1)), 100);
        assert_eq!(outcome.duration_ms, Some(60));
        assert_eq!(c.pending_count(), 0);
    }

    // =========================================================================
    // Name fallback
    // =========================================================================

    #[test]
    fn fallback_resolves_oldest_same_name_first() {
        let mut c = ToolCallCorrelator::new();
        let first = c.register_start(&start(None, "x"), 0);
        c.register_start(&start(None, "y"), 5);
        let second = c.register_start(&start(None, "x"), 10);

        let one = c.register_response(&response(None, "x", json!("r1")), 30);
        assert_eq!(one.key, Some(first));
        assert_eq!(one.duration_ms, Some(30));

        let two = c.register_response(&response(None, "x", json!("r2")), 50);
        assert_eq!(two.key, Some(second));
        assert_eq!(two.duration_ms, Some(40));

        assert_eq!(c.pending_count(), 1);
        let (_, left) = c.pending_calls().next().unwrap();
        assert_eq!(left.tool_name, "y");
    }

    #[test]
    fn unknown_id_falls_back_to_name() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(Some("1"), "search"), 0);
        let outcome = c.register_response(&response(Some("zz"), "search", json!(1)), 5);
        assert!(outcome.matched);
        assert_eq!(outcome.key, Some(CallKey::Remote("1".to_string())));
    }

    #[test]
    fn completed_calls_are_never_rematched() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(Some("1"), "search"), 0);
        assert!(c.register_response(&response(Some("1"), "search", json!(1)), 5).matched);

        let again = c.register_response(&response(Some("1"), "search", json!(2)), 6);
        assert!(!again.matched);
        assert_eq!(c.lookup_completed("1").unwrap().result, json!(1));
    }

    #[test]
    fn new_start_after_completion_is_independent() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(None, "search"), 0);
        c.register_response(&response(None, "search", json!(1)), 5);
        let fresh = c.register_start(&start(None, "search"), 10);
        assert!(c.is_key_pending(&fresh));
        assert!(c.lookup_key(&fresh).is_none());
    }

    // =========================================================================
    // Misses
    // =========================================================================

    #[test]
    fn miss_leaves_state_untouched() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(Some("1"), "search"), 0);
        let outcome = c.register_response(&response(None, "calculator", json!(1)), 5);
        assert_eq!(outcome, Correlation::miss());
        assert!(c.is_pending("1"));
    }

    #[test]
    fn unmatched_starts_stay_pending() {
        let mut c = ToolCallCorrelator::new();
        c.register_start(&start(Some("1"), "search"), 0);
        c.register_start(&start(None, "db"), 0);
        assert_eq!(c.pending_count(), 2);
        let names: Vec<_> = c.pending_calls().map(|(_, p)| p.tool_name.as_str()).collect();
        assert_eq!(names, vec!["search", "db"]);
    }
}
