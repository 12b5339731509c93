use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ExamId = String;
pub type StudentId = String;
pub type ConnectionId = String;

/// Closed set of presence/activity events carried by `monitor_update` and the activity log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Connected,
    FocusLost,
    FocusGained,
    Submitted,
    LeftExam,
    Disconnected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connected => "CONNECTED",
            EventType::FocusLost => "FOCUS_LOST",
            EventType::FocusGained => "FOCUS_GAINED",
            EventType::Submitted => "SUBMITTED",
            EventType::LeftExam => "LEFT_EXAM",
            EventType::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of events a student client may report through `student_activity`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    FocusLost,
    FocusGained,
}

impl From<ActivityKind> for EventType {
    fn from(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::FocusLost => EventType::FocusLost,
            ActivityKind::FocusGained => EventType::FocusGained,
        }
    }
}

/// A student's presence as seen by proctors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Focused,
    Away,
    Submitted,
    Offline,
}

impl StudentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StudentStatus::Submitted)
    }

    /// Status an event leads to, ignoring the current state
    pub fn target(event: EventType) -> Self {
        match event {
            EventType::Connected | EventType::FocusGained => StudentStatus::Focused,
            EventType::FocusLost => StudentStatus::Away,
            EventType::Submitted => StudentStatus::Submitted,
            EventType::LeftExam | EventType::Disconnected => StudentStatus::Offline,
        }
    }

    /// Transition table shared by the live projection and log replay.
    ///
    /// Returns `None` when the event must not change the status, which is
    /// always the case once a student has submitted.
    pub fn transition(current: Option<Self>, event: EventType) -> Option<Self> {
        match current {
            Some(status) if status.is_terminal() => None,
            _ => Some(Self::target(event)),
        }
    }
}

impl fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StudentStatus::Focused => "focused",
            StudentStatus::Away => "away",
            StudentStatus::Submitted => "submitted",
            StudentStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Identity bound to a student connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentIdentity {
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub student_name: String,
    pub picture: Option<String>,
}

impl StudentIdentity {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.student_id, &self.exam_id)
    }
}

/// One logical presence: a student within one exam, regardless of how many tabs are open
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub student_id: StudentId,
    pub exam_id: ExamId,
}

impl SessionKey {
    pub fn new(student_id: &str, exam_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            exam_id: exam_id.to_string(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.student_id, self.exam_id)
    }
}

/// Normalized event republished to every room member as `monitor_update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    pub student_id: StudentId,
    pub student_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_picture: Option<String>,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<u32>,
}

impl MonitorEvent {
    pub fn new(identity: &StudentIdentity, event_type: EventType) -> Self {
        Self {
            student_id: identity.student_id.clone(),
            student_name: identity.student_name.clone(),
            student_picture: identity.picture.clone(),
            event_type,
            timestamp: Utc::now(),
            score: None,
            total_questions: None,
        }
    }

    pub fn with_score(mut self, score: u32, total_questions: u32) -> Self {
        self.score = Some(score);
        self.total_questions = Some(total_questions);
        self
    }
}

/// Folds a submission's logged events through the transition table
pub fn replay<I>(events: I) -> Option<StudentStatus>
where
    I: IntoIterator<Item = EventType>,
{
    events.into_iter().fold(None, |current, event| {
        StudentStatus::transition(current, event).or(current)
    })
}
