use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tokio::sync::RwLock;

use super::{
    ActivityLogRecord, ExamSchedule, ExamStatus, ExamStore, Participant, SubmissionId,
    SubmissionStatus,
};
use crate::error::{MonitorError, Result};
use crate::monitor::{EventType, ExamId, StudentId};

#[derive(Debug, Clone)]
struct StudentRecord {
    name: String,
    email: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Clone)]
struct Submission {
    exam_id: ExamId,
    student_id: StudentId,
    status: SubmissionStatus,
    submitted_at: Option<DateTime<Utc>>,
    raw_score: Option<u32>,
    total_questions: Option<u32>,
}

#[derive(Default)]
struct Inner {
    exams: HashMap<ExamId, ExamSchedule>,
    students: HashMap<StudentId, StudentRecord>,
    enrollments: HashMap<ExamId, BTreeSet<StudentId>>,
    submissions: HashMap<SubmissionId, Submission>,
    submission_index: HashMap<(ExamId, StudentId), SubmissionId>,
    activity: HashMap<SubmissionId, Vec<ActivityLogRecord>>,
    next_submission_id: SubmissionId,
}

impl Inner {
    fn find_or_insert_submission(&mut self, exam_id: &str, student_id: &str) -> SubmissionId {
        let key = (exam_id.to_string(), student_id.to_string());
        if let Some(id) = self.submission_index.get(&key) {
            return *id;
        }

        self.next_submission_id += 1;
        let id = self.next_submission_id;
        self.submissions.insert(
            id,
            Submission {
                exam_id: exam_id.to_string(),
                student_id: student_id.to_string(),
                status: SubmissionStatus::Ongoing,
                submitted_at: None,
                raw_score: None,
                total_questions: None,
            },
        );
        self.submission_index.insert(key, id);
        tracing::debug!(
            exam_id = %exam_id,
            student_id = %student_id,
            submission_id = id,
            "Created ongoing submission"
        );
        id
    }
}

/// Seed document for [`MemoryStore::from_seed_file`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedFile {
    #[serde(default)]
    pub exams: Vec<SeedExam>,
    #[serde(default)]
    pub students: Vec<SeedStudent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedExam {
    pub id: ExamId,
    pub status: ExamStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    #[serde(default)]
    pub allow_late_submission: bool,
    #[serde(default)]
    pub participants: Vec<StudentId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedStudent {
    pub id: StudentId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Process-local [`ExamStore`] used by the server binary and the tests
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedFile) -> Self {
        let mut inner = Inner::default();

        for student in seed.students {
            inner.students.insert(
                student.id,
                StudentRecord {
                    name: student.name,
                    email: student.email,
                    picture: student.picture,
                },
            );
        }

        for exam in seed.exams {
            inner
                .enrollments
                .entry(exam.id.clone())
                .or_default()
                .extend(exam.participants);
            inner.exams.insert(
                exam.id.clone(),
                ExamSchedule {
                    id: exam.id,
                    status: exam.status,
                    start_time: exam.start_time,
                    duration_minutes: exam.duration_minutes,
                    allow_late_submission: exam.allow_late_submission,
                },
            );
        }

        Self {
            inner: RwLock::new(inner),
        }
    }

    pub async fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let seed: SeedFile = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.as_ref().display(),
            exams = seed.exams.len(),
            students = seed.students.len(),
            "Loaded exam seed file"
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn insert_exam(&self, exam: ExamSchedule) {
        let mut inner = self.inner.write().await;
        inner.exams.insert(exam.id.clone(), exam);
    }

    pub async fn insert_student(
        &self,
        student_id: &str,
        name: &str,
        email: Option<String>,
        picture: Option<String>,
    ) {
        let mut inner = self.inner.write().await;
        inner.students.insert(
            student_id.to_string(),
            StudentRecord {
                name: name.to_string(),
                email,
                picture,
            },
        );
    }

    pub async fn enroll(&self, exam_id: &str, student_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .enrollments
            .entry(exam_id.to_string())
            .or_default()
            .insert(student_id.to_string());
    }
}

#[async_trait]
impl ExamStore for MemoryStore {
    async fn get_or_create_ongoing_submission(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<SubmissionId> {
        let mut inner = self.inner.write().await;
        Ok(inner.find_or_insert_submission(exam_id, student_id))
    }

    async fn find_submission(&self, exam_id: &str, student_id: &str) -> Result<Option<SubmissionId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .submission_index
            .get(&(exam_id.to_string(), student_id.to_string()))
            .copied())
    }

    async fn submission_status(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Option<SubmissionStatus>> {
        let inner = self.inner.read().await;
        let status = inner
            .submission_index
            .get(&(exam_id.to_string(), student_id.to_string()))
            .and_then(|id| inner.submissions.get(id))
            .map(|submission| submission.status);
        Ok(status)
    }

    async fn append_activity_log(
        &self,
        submission_id: SubmissionId,
        event_type: EventType,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.submissions.contains_key(&submission_id) {
            return Err(MonitorError::SubmissionNotFound(submission_id));
        }

        inner
            .activity
            .entry(submission_id)
            .or_default()
            .push(ActivityLogRecord {
                submission_id,
                event_type,
                timestamp: Utc::now(),
            });
        Ok(())
    }

    async fn activity_log(&self, submission_id: SubmissionId) -> Result<Vec<ActivityLogRecord>> {
        let inner = self.inner.read().await;
        if !inner.submissions.contains_key(&submission_id) {
            return Err(MonitorError::SubmissionNotFound(submission_id));
        }
        Ok(inner.activity.get(&submission_id).cloned().unwrap_or_default())
    }

    async fn record_submission(
        &self,
        exam_id: &str,
        student_id: &str,
        score: u32,
        total_questions: u32,
    ) -> Result<SubmissionId> {
        let mut inner = self.inner.write().await;
        let id = inner.find_or_insert_submission(exam_id, student_id);

        let submission = inner
            .submissions
            .get_mut(&id)
            .ok_or(MonitorError::SubmissionNotFound(id))?;
        submission.status = SubmissionStatus::Submitted;
        submission.submitted_at = Some(Utc::now());
        submission.raw_score = Some(score);
        submission.total_questions = Some(total_questions);

        Ok(id)
    }

    async fn list_participants(&self, exam_id: &str) -> Result<Vec<Participant>> {
        let inner = self.inner.read().await;

        let mut student_ids: BTreeSet<StudentId> = inner
            .enrollments
            .get(exam_id)
            .cloned()
            .unwrap_or_default();
        student_ids.extend(
            inner
                .submissions
                .values()
                .filter(|submission| submission.exam_id == exam_id)
                .map(|submission| submission.student_id.clone()),
        );

        let participants = student_ids
            .into_iter()
            .map(|student_id| {
                let record = inner.students.get(&student_id);
                let submission = inner
                    .submission_index
                    .get(&(exam_id.to_string(), student_id.clone()))
                    .and_then(|id| inner.submissions.get(id));

                Participant {
                    name: record
                        .map(|r| r.name.clone())
                        .unwrap_or_else(|| student_id.clone()),
                    email: record.and_then(|r| r.email.clone()),
                    picture: record.and_then(|r| r.picture.clone()),
                    status: submission.map(|s| s.status),
                    submitted_at: submission.and_then(|s| s.submitted_at),
                    raw_score: submission.and_then(|s| s.raw_score),
                    total_questions: submission.and_then(|s| s.total_questions),
                    id: student_id,
                }
            })
            .collect();

        Ok(participants)
    }

    async fn exam_schedule(&self, exam_id: &str) -> Result<Option<ExamSchedule>> {
        let inner = self.inner.read().await;
        Ok(inner.exams.get(exam_id).cloned())
    }

    async fn active_exams(&self) -> Result<Vec<ExamSchedule>> {
        let inner = self.inner.read().await;
        Ok(inner
            .exams
            .values()
            .filter(|exam| exam.is_active())
            .cloned()
            .collect())
    }

    async fn close_exam(&self, exam_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let exam = inner
            .exams
            .get_mut(exam_id)
            .ok_or_else(|| MonitorError::ExamNotFound(exam_id.to_string()))?;
        exam.status = ExamStatus::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = MemoryStore::new();

        let first = store.get_or_create_ongoing_submission("e1", "s1").await.unwrap();
        let second = store.get_or_create_ongoing_submission("e1", "s1").await.unwrap();
        let other = store.get_or_create_ongoing_submission("e1", "s2").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(
            store.submission_status("e1", "s1").await.unwrap(),
            Some(SubmissionStatus::Ongoing)
        );
    }

    #[tokio::test]
    async fn test_activity_requires_submission() {
        let store = MemoryStore::new();

        let err = store.append_activity_log(99, EventType::FocusLost).await;
        assert!(matches!(err, Err(MonitorError::SubmissionNotFound(99))));

        let id = store.get_or_create_ongoing_submission("e1", "s1").await.unwrap();
        store.append_activity_log(id, EventType::Connected).await.unwrap();
        store.append_activity_log(id, EventType::FocusLost).await.unwrap();

        let log = store.activity_log(id).await.unwrap();
        let events: Vec<EventType> = log.iter().map(|r| r.event_type).collect();
        assert_eq!(events, vec![EventType::Connected, EventType::FocusLost]);
    }

    #[tokio::test]
    async fn test_record_submission_reuses_ongoing_row() {
        let store = MemoryStore::new();
        let ongoing = store.get_or_create_ongoing_submission("e1", "s1").await.unwrap();

        let submitted = store.record_submission("e1", "s1", 7, 10).await.unwrap();
        assert_eq!(ongoing, submitted);
        assert_eq!(
            store.submission_status("e1", "s1").await.unwrap(),
            Some(SubmissionStatus::Submitted)
        );
    }

    #[tokio::test]
    async fn test_participants_merge_enrollment_and_submissions() {
        let store = MemoryStore::new();
        store
            .insert_student("s1", "Ada", Some("ada@example.com".to_string()), None)
            .await;
        store.enroll("e1", "s1").await;
        store.record_submission("e1", "s2", 5, 10).await.unwrap();

        let participants = store.list_participants("e1").await.unwrap();
        assert_eq!(participants.len(), 2);

        let ada = &participants[0];
        assert_eq!(ada.name, "Ada");
        assert_eq!(ada.status, None);

        let walk_in = &participants[1];
        assert_eq!(walk_in.name, "s2");
        assert_eq!(walk_in.status, Some(SubmissionStatus::Submitted));
        assert_eq!(walk_in.raw_score, Some(5));
    }

    #[tokio::test]
    async fn test_close_exam_removes_from_active() {
        let store = MemoryStore::from_seed(SeedFile {
            exams: vec![SeedExam {
                id: "e1".to_string(),
                status: ExamStatus::Active,
                start_time: None,
                duration_minutes: 30,
                allow_late_submission: false,
                participants: vec![],
            }],
            students: vec![],
        });

        assert_eq!(store.active_exams().await.unwrap().len(), 1);
        store.close_exam("e1").await.unwrap();
        assert!(store.active_exams().await.unwrap().is_empty());

        let missing = store.close_exam("nope").await;
        assert!(matches!(missing, Err(MonitorError::ExamNotFound(_))));
    }

    #[test]
    fn test_seed_file_format() {
        let raw = r#"{
            "exams": [{
                "id": "midterm",
                "status": "active",
                "startTime": "2026-05-01T09:00:00Z",
                "durationMinutes": 90,
                "participants": ["s1"]
            }],
            "students": [{ "id": "s1", "name": "Ada", "email": "ada@example.com" }]
        }"#;

        let seed: SeedFile = serde_json::from_str(raw).unwrap();
        assert_eq!(seed.exams[0].duration_minutes, 90);
        assert!(!seed.exams[0].allow_late_submission);
        assert_eq!(seed.students[0].picture, None);
    }
}
