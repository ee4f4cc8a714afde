//! Client configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// When a session mints a new thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPolicy {
    /// One thread per opened conversation context.
    #[default]
    PerSession,
    /// A fresh thread for every message; the backend keeps no memory.
    PerMessage,
}

impl FromStr for ThreadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_session" | "per-session" => Ok(Self::PerSession),
            "per_message" | "per-message" => Ok(Self::PerMessage),
            other => Err(format!("unknown thread policy: {other}")),
        }
    }
}

/// Configuration for talking to the chat backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Backend base URL (e.g., `http://127.0.0.1:8000`).
    #[serde(default = "ClientConfig::default_base_url")]
    pub base_url: String,

    /// Path of the general assistant endpoint.
    #[serde(default = "ClientConfig::default_assistant_path")]
    pub assistant_path: String,

    /// Path of the course-scoped endpoint.
    #[serde(default = "ClientConfig::default_course_path")]
    pub course_path: String,

    /// Path used by the probe harness.
    #[serde(default = "ClientConfig::default_probe_path")]
    pub probe_path: String,

    /// TCP connect timeout in seconds. There is no overall request timeout.
    #[serde(default = "ClientConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Thread id lifetime.
    #[serde(default)]
    pub thread_policy: ThreadPolicy,
}

impl ClientConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:8000".to_string()
    }

    fn default_assistant_path() -> String {
        "/api/chat".to_string()
    }

    fn default_course_path() -> String {
        "/api/chat/course".to_string()
    }

    fn default_probe_path() -> String {
        "/chat".to_string()
    }

    const fn default_connect_timeout() -> u64 {
        10
    }

    /// Defaults overlaid with `PORTAL_CHAT_*` environment variables.
    ///
    /// Malformed values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("PORTAL_CHAT_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        if let Some(raw) = lookup("PORTAL_CHAT_CONNECT_TIMEOUT") {
            match raw.trim().parse() {
                Ok(seconds) => self.connect_timeout_seconds = seconds,
                Err(_) => warn!(value = %raw, "Ignoring invalid PORTAL_CHAT_CONNECT_TIMEOUT"),
            }
        }
        if let Some(raw) = lookup("PORTAL_CHAT_THREAD_POLICY") {
            match raw.parse() {
                Ok(policy) => self.thread_policy = policy,
                Err(e) => warn!(error = %e, "Ignoring invalid PORTAL_CHAT_THREAD_POLICY"),
            }
        }
        self
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Join the base URL and `path` with exactly one slash.
    ///
    /// An absolute `http(s)://` path is returned unchanged.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            assistant_path: Self::default_assistant_path(),
            course_path: Self::default_course_path(),
            probe_path: Self::default_probe_path(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            thread_policy: ThreadPolicy::default(),
        }
    }
}
