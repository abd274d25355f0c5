use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::interaction::Interaction;

/// Role a peer holds within a session. Exactly one live Teacher is
/// permitted per session; Students are unbounded. The Host node
/// additionally acts as hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Teacher,
    Student,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRef {
    pub name: String,
    pub intro: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRef {
    pub title: String,
    pub intro: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// The canonical classroom tuple.
///
/// Mutated only by the hub in response to validated commands; every client
/// holds a read-only mirror converged by inbound `state` envelopes.
#[derive(Debug, Clone, Default)]
pub struct ClassroomState {
    pub course: Option<CourseRef>,
    pub lesson: Option<LessonRef>,
    pub active_interaction: Option<Interaction>,
}

impl ClassroomState {
    pub fn clear(&mut self) {
        self.course = None;
        self.lesson = None;
        self.active_interaction = None;
    }

    pub fn course_name(&self) -> &str {
        self.course.as_ref().map(|c| c.name.as_str()).unwrap_or("")
    }
}
