use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::events::ExamId;
use super::protocol::ServerMessage;
use super::rooms::RoomManager;
use crate::error::Result;
use crate::store::{ExamSchedule, ExamStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Close,
    AnnounceStart,
    Idle,
}

/// Decides what one sweep tick does with an active exam.
///
/// An exam is closed once `now` is past `start + duration`, unless it allows late
/// submissions. An exam whose start fell inside the last sweep interval is announced.
pub fn plan(exam: &ExamSchedule, now: DateTime<Utc>, sweep_interval: Duration) -> SweepAction {
    if !exam.is_active() {
        return SweepAction::Idle;
    }

    let Some(start) = exam.start_time else {
        return SweepAction::Idle;
    };

    if !exam.allow_late_submission {
        if let Some(end) = exam.end_time() {
            if now > end {
                return SweepAction::Close;
            }
        }
    }

    let window = ChronoDuration::milliseconds(sweep_interval.as_millis() as i64);
    if start <= now && start > now - window {
        return SweepAction::AnnounceStart;
    }

    SweepAction::Idle
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub closed: Vec<ExamId>,
    pub started: Vec<ExamId>,
}

/// Exam-level fan-out plus the periodic end-time enforcement
pub struct ExamLifecycle {
    store: Arc<dyn ExamStore>,
    rooms: Arc<RoomManager>,
    sweep_interval: Duration,
}

impl ExamLifecycle {
    pub fn new(store: Arc<dyn ExamStore>, rooms: Arc<RoomManager>, sweep_interval: Duration) -> Self {
        Self {
            store,
            rooms,
            sweep_interval,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub async fn broadcast_started(&self, exam_id: &str) -> usize {
        let message = ServerMessage::ExamStarted {
            exam_id: exam_id.to_string(),
        };
        let delivered = self.rooms.broadcast(exam_id, &message, None).await;
        tracing::info!(exam_id = %exam_id, delivered, "Broadcast exam started");
        delivered
    }

    pub async fn broadcast_closed(&self, exam_id: &str) -> usize {
        let message = ServerMessage::ExamClosed {
            exam_id: exam_id.to_string(),
        };
        let delivered = self.rooms.broadcast(exam_id, &message, None).await;
        tracing::info!(exam_id = %exam_id, delivered, "Broadcast exam closed");
        delivered
    }

    pub async fn broadcast_deleted(&self, exam_id: &str) -> usize {
        let message = ServerMessage::ExamDeleted {
            exam_id: exam_id.to_string(),
        };
        let delivered = self.rooms.broadcast(exam_id, &message, None).await;
        tracing::info!(exam_id = %exam_id, delivered, "Broadcast exam deleted");
        delivered
    }

    /// One sweep tick. Re-running it is a no-op for exams it already closed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for exam in self.store.active_exams().await? {
            match plan(&exam, now, self.sweep_interval) {
                SweepAction::Close => {
                    if let Err(e) = self.store.close_exam(&exam.id).await {
                        tracing::error!(exam_id = %exam.id, error = %e, "Failed to close expired exam");
                        continue;
                    }
                    tracing::info!(
                        exam_id = %exam.id,
                        end_time = ?exam.end_time(),
                        "Closed expired exam"
                    );
                    self.broadcast_closed(&exam.id).await;
                    report.closed.push(exam.id);
                }
                SweepAction::AnnounceStart => {
                    self.broadcast_started(&exam.id).await;
                    report.started.push(exam.id);
                }
                SweepAction::Idle => {}
            }
        }

        Ok(report)
    }
}
