use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::events::{MonitorEvent, StudentId, StudentStatus};
use crate::store::{Participant, SubmissionStatus};

/// One row of the proctor-facing live table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionEntry {
    pub student_id: StudentId,
    pub student_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_picture: Option<String>,
    pub status: StudentStatus,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<u32>,
}

/// Live student -> status map for one exam
#[derive(Debug, Default, Clone)]
pub struct ExamProjection {
    entries: HashMap<StudentId, ProjectionEntry>,
}

impl ExamProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patches the entry for the event's student in arrival order.
    ///
    /// Returns false when the student is already submitted and the event was discarded.
    pub fn apply(&mut self, event: &MonitorEvent) -> bool {
        let current = self.entries.get(&event.student_id).map(|entry| entry.status);
        let Some(next) = StudentStatus::transition(current, event.event_type) else {
            return false;
        };

        let entry = self
            .entries
            .entry(event.student_id.clone())
            .or_insert_with(|| ProjectionEntry {
                student_id: event.student_id.clone(),
                student_name: event.student_name.clone(),
                student_picture: None,
                status: next,
                last_update: event.timestamp,
                score: None,
                total_questions: None,
            });

        entry.student_name = event.student_name.clone();
        if event.student_picture.is_some() {
            entry.student_picture = event.student_picture.clone();
        }
        entry.status = next;
        entry.last_update = event.timestamp;
        if next.is_terminal() {
            entry.score = event.score;
            entry.total_questions = event.total_questions;
        }

        true
    }

    /// Seeds the map from durable participant rows.
    ///
    /// Persisted submissions always win. Otherwise a live entry is kept as is,
    /// and students without one are `focused` if `is_online` says so, else `offline`.
    pub fn seed<F>(&mut self, participants: &[Participant], is_online: F)
    where
        F: Fn(&str) -> bool,
    {
        let now = Utc::now();

        for participant in participants {
            if participant.status == Some(SubmissionStatus::Submitted) {
                self.entries.insert(
                    participant.id.clone(),
                    ProjectionEntry {
                        student_id: participant.id.clone(),
                        student_name: participant.name.clone(),
                        student_picture: participant.picture.clone(),
                        status: StudentStatus::Submitted,
                        last_update: participant.submitted_at.unwrap_or(now),
                        score: participant.raw_score,
                        total_questions: participant.total_questions,
                    },
                );
                continue;
            }

            if self.entries.contains_key(&participant.id) {
                continue;
            }

            let status = if is_online(&participant.id) {
                StudentStatus::Focused
            } else {
                StudentStatus::Offline
            };

            self.entries.insert(
                participant.id.clone(),
                ProjectionEntry {
                    student_id: participant.id.clone(),
                    student_name: participant.name.clone(),
                    student_picture: participant.picture.clone(),
                    status,
                    last_update: now,
                    score: None,
                    total_questions: None,
                },
            );
        }
    }

    /// Replaces the whole map, as a proctor client does on receiving a snapshot
    pub fn replace(&mut self, entries: Vec<ProjectionEntry>) {
        self.entries = entries
            .into_iter()
            .map(|entry| (entry.student_id.clone(), entry))
            .collect();
    }

    pub fn get(&self, student_id: &str) -> Option<&ProjectionEntry> {
        self.entries.get(student_id)
    }

    pub fn status(&self, student_id: &str) -> Option<StudentStatus> {
        self.entries.get(student_id).map(|entry| entry.status)
    }

    pub fn is_submitted(&self, student_id: &str) -> bool {
        self.status(student_id)
            .map(StudentStatus::is_terminal)
            .unwrap_or(false)
    }

    /// Entries ordered by student name, then id
    pub fn entries(&self) -> Vec<ProjectionEntry> {
        let mut entries: Vec<ProjectionEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.student_name
                .cmp(&b.student_name)
                .then_with(|| a.student_id.cmp(&b.student_id))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
