//! Durable exam/submission records the monitor reads and appends to.
//!
//! Persistence itself belongs to the surrounding application; the monitor
//! only needs the handful of operations on [`ExamStore`].

mod memory;

pub use memory::{MemoryStore, SeedExam, SeedFile, SeedStudent};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::monitor::{EventType, ExamId, StudentId};

pub type SubmissionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Ongoing,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamStatus {
    Draft,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogRecord {
    pub submission_id: SubmissionId,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

/// A student enrolled in or attempting an exam, joined with their submission row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: StudentId,
    pub name: String,
    pub email: Option<String>,
    pub picture: Option<String>,
    pub status: Option<SubmissionStatus>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub raw_score: Option<u32>,
    pub total_questions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSchedule {
    pub id: ExamId,
    pub status: ExamStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub allow_late_submission: bool,
}

impl ExamSchedule {
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .map(|start| start + ChronoDuration::minutes(self.duration_minutes))
    }

    pub fn is_active(&self) -> bool {
        self.status == ExamStatus::Active
    }
}

#[async_trait]
pub trait ExamStore: Send + Sync {
    /// Returns the ongoing or submitted submission for the pair, creating an ongoing one if absent
    async fn get_or_create_ongoing_submission(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<SubmissionId>;

    async fn find_submission(&self, exam_id: &str, student_id: &str) -> Result<Option<SubmissionId>>;

    async fn submission_status(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Option<SubmissionStatus>>;

    async fn append_activity_log(
        &self,
        submission_id: SubmissionId,
        event_type: EventType,
    ) -> Result<()>;

    async fn activity_log(&self, submission_id: SubmissionId) -> Result<Vec<ActivityLogRecord>>;

    /// Persists a graded submission, creating the row if the student never produced activity
    async fn record_submission(
        &self,
        exam_id: &str,
        student_id: &str,
        score: u32,
        total_questions: u32,
    ) -> Result<SubmissionId>;

    async fn list_participants(&self, exam_id: &str) -> Result<Vec<Participant>>;

    async fn exam_schedule(&self, exam_id: &str) -> Result<Option<ExamSchedule>>;

    async fn active_exams(&self) -> Result<Vec<ExamSchedule>>;

    async fn close_exam(&self, exam_id: &str) -> Result<()>;
}
