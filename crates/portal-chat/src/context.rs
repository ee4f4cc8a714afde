//! Request context passed into a session.
//!
//! The controller never reads user or auth state from anywhere else: a
//! [`ChatContext`] is handed to it at construction and every outgoing
//! [`ChatRequest`] is built from it.

use portal_chat_core::ThreadId;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

/// Institutional site sent by the general assistant.
pub const DEFAULT_SITE_URL: &str = "https://eem.bakircay.edu.tr";

/// Institution name sent by the general assistant.
pub const DEFAULT_SCHOOL: &str = "Izmir Bakircay Universitesi";

/// Department name sent by the probe harness.
pub const DEFAULT_DEPARTMENT: &str = "Elektrik Elektronik Mühendisliği";

/// The logged-in student, as far as the chat needs to know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Portal user id.
    pub id: Option<String>,
    /// Student number.
    pub student_id: Option<String>,
    /// Department id.
    pub department_id: Option<String>,
}

/// Which conversation surface a session talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    /// The general student assistant.
    Assistant {
        /// Institutional site the answers should draw on.
        url: String,
        /// Institution name.
        school: String,
    },
    /// Chat scoped to one course.
    Course {
        /// Course id.
        course_id: String,
    },
    /// The SSE probe harness.
    Probe {
        /// Institutional site.
        url: String,
        /// Institution name.
        school: String,
        /// Department name.
        department: String,
    },
}

impl ChatTarget {
    /// The general assistant with the default institution.
    #[must_use]
    pub fn assistant() -> Self {
        Self::Assistant {
            url: DEFAULT_SITE_URL.to_string(),
            school: DEFAULT_SCHOOL.to_string(),
        }
    }

    /// A course-scoped chat.
    #[must_use]
    pub fn course(course_id: impl Into<String>) -> Self {
        Self::Course {
            course_id: course_id.into(),
        }
    }

    /// The probe harness with the default institution and department.
    #[must_use]
    pub fn probe() -> Self {
        Self::Probe {
            url: DEFAULT_SITE_URL.to_string(),
            school: DEFAULT_SCHOOL.to_string(),
            department: DEFAULT_DEPARTMENT.to_string(),
        }
    }

    /// Endpoint path for this surface.
    #[must_use]
    pub fn path<'a>(&self, config: &'a ClientConfig) -> &'a str {
        match self {
            Self::Assistant { .. } => &config.assistant_path,
            Self::Course { .. } => &config.course_path,
            Self::Probe { .. } => &config.probe_path,
        }
    }

    /// Short label for logs and prompts.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Assistant { .. } => "assistant",
            Self::Course { .. } => "course",
            Self::Probe { .. } => "probe",
        }
    }
}

/// Everything a session needs to know about its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    /// The logged-in user.
    pub profile: UserProfile,
    /// Bearer token, if the backend wants one.
    pub token: Option<String>,
    /// Conversation surface.
    pub target: ChatTarget,
}

impl ChatContext {
    /// Context for `target` with an anonymous profile and no token.
    #[must_use]
    pub fn new(target: ChatTarget) -> Self {
        Self {
            profile: UserProfile::default(),
            token: None,
            target,
        }
    }

    /// Set the user profile.
    #[must_use]
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Payload fields contributed by the target and profile.
    #[must_use]
    pub fn fields(&self) -> ContextFields {
        match &self.target {
            ChatTarget::Assistant { url, school } => ContextFields::Assistant {
                url: url.clone(),
                school: school.clone(),
                student_id: self.profile.student_id.clone(),
                user_id: self.profile.id.clone(),
                department_id: self.profile.department_id.clone(),
            },
            ChatTarget::Course { course_id } => ContextFields::Course {
                course_id: course_id.clone(),
            },
            ChatTarget::Probe {
                url,
                school,
                department,
            } => ContextFields::Probe {
                url: url.clone(),
                school: school.clone(),
                department: department.clone(),
            },
        }
    }
}

/// Surface-specific payload fields, flattened into the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ContextFields {
    /// General assistant fields.
    Assistant {
        /// Institutional site.
        url: String,
        /// Institution name.
        school: String,
        /// Student number.
        student_id: Option<String>,
        /// Portal user id.
        user_id: Option<String>,
        /// Department id.
        department_id: Option<String>,
    },
    /// Course fields.
    Course {
        /// Course id.
        course_id: String,
    },
    /// Probe harness fields.
    Probe {
        /// Institutional site.
        url: String,
        /// Institution name.
        school: String,
        /// Department name.
        department: String,
    },
}

/// JSON body of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    /// The student's message.
    pub message: String,
    /// Conversation key.
    pub thread_id: ThreadId,
    /// Surface-specific fields.
    #[serde(flatten)]
    pub context: ContextFields,
}

impl ChatRequest {
    /// Build the body for `message` on `thread_id`.
    #[must_use]
    pub fn new(message: impl Into<String>, thread_id: ThreadId, context: &ChatContext) -> Self {
        Self {
            message: message.into(),
            thread_id,
            context: context.fields(),
        }
    }
}
