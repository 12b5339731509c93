use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::events::{
    ActivityKind, EventType, ExamId, MonitorEvent, SessionKey, StudentIdentity,
};
use super::grace::GraceTimers;
use super::lifecycle::{ExamLifecycle, SweepReport};
use super::projection::{ExamProjection, ProjectionEntry};
use super::protocol::ServerMessage;
use super::registry::{Registration, SessionRegistry};
use super::relay::SignalingRelay;
use super::rooms::{ClientSender, RoomManager};
use crate::config::{MonitorConfig, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::error::Result;
use crate::store::{ActivityLogRecord, ExamStatus, ExamStore, SubmissionStatus};

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub grace_period: Duration,
    pub sweep_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let config = MonitorConfig::default();
        Self::from(&config)
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            grace_period: config.grace_period,
            sweep_interval: config.sweep_interval,
        }
    }
}

/// Whether a monitor update still goes out when the projection refused it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    IfApplied,
    Always,
}

/// Result of a guarded activity-log write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recorded {
    Logged,
    /// Storage failed; the live view proceeds without the audit record
    Unlogged,
    /// The student has submitted; nothing was written and nothing may be published
    Terminal,
}

/// One async mutex per session key, so the check-then-write steps for a
/// student never interleave with another handler for the same student.
#[derive(Default)]
struct SessionLocks {
    locks: StdMutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    fn get(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    fn forget_exam(&self, exam_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|key, _| key.exam_id != exam_id);
    }
}

/// Owns all live monitoring state for the process: room membership, the
/// session registry, grace timers and per-exam projections.
pub struct MonitorServer {
    store: Arc<dyn ExamStore>,
    registry: RwLock<SessionRegistry>,
    rooms: Arc<RoomManager>,
    projections: RwLock<HashMap<ExamId, ExamProjection>>,
    grace: GraceTimers,
    session_locks: SessionLocks,
    lifecycle: Arc<ExamLifecycle>,
    sweep_task: StdMutex<Option<JoinHandle<()>>>,
}

impl MonitorServer {
    pub fn new(store: Arc<dyn ExamStore>, settings: MonitorSettings) -> Arc<Self> {
        let rooms = RoomManager::new();
        let lifecycle = Arc::new(ExamLifecycle::new(
            store.clone(),
            rooms.clone(),
            settings.sweep_interval,
        ));

        tracing::info!(
            grace_secs = settings.grace_period.as_secs(),
            sweep_secs = settings.sweep_interval.as_secs(),
            "Monitor server created"
        );

        Arc::new(Self {
            store,
            registry: RwLock::new(SessionRegistry::new()),
            rooms,
            projections: RwLock::new(HashMap::new()),
            grace: GraceTimers::new(settings.grace_period),
            session_locks: SessionLocks::default(),
            lifecycle,
            sweep_task: StdMutex::new(None),
        })
    }

    pub fn store(&self) -> &Arc<dyn ExamStore> {
        &self.store
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    pub fn grace_timers(&self) -> &GraceTimers {
        &self.grace
    }

    /// JOIN: subscribes the connection to the exam room, then registers the
    /// student identity or, for observers, sends the projection snapshot.
    pub async fn join_exam(
        &self,
        connection_id: &str,
        sender: ClientSender,
        exam_id: &str,
        identity: Option<StudentIdentity>,
    ) {
        self.rooms.join(exam_id, connection_id, sender).await;

        match self.store.exam_schedule(exam_id).await {
            Ok(Some(schedule)) if schedule.status == ExamStatus::Closed => {
                self.rooms
                    .send_to(
                        exam_id,
                        connection_id,
                        ServerMessage::ExamClosed {
                            exam_id: exam_id.to_string(),
                        },
                    )
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(exam_id = %exam_id, error = %e, "Failed to look up exam schedule");
            }
        }

        match identity {
            Some(identity) => self.register(connection_id, identity).await,
            None => match self.snapshot(exam_id).await {
                Ok(students) => {
                    tracing::info!(
                        exam_id = %exam_id,
                        connection_id = %connection_id,
                        students = students.len(),
                        "Observer joined exam, sending snapshot"
                    );
                    self.rooms
                        .send_to(
                            exam_id,
                            connection_id,
                            ServerMessage::MonitorSnapshot {
                                exam_id: exam_id.to_string(),
                                students,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    tracing::error!(exam_id = %exam_id, error = %e, "Failed to build projection snapshot");
                }
            },
        }
    }

    /// Binds a student identity to a connection. A new binding cancels any
    /// pending grace timer for the student and emits CONNECTED.
    pub async fn register(&self, connection_id: &str, identity: StudentIdentity) {
        let key = identity.session_key();
        let lock = self.session_locks.get(&key);
        let _guard = lock.lock().await;

        let registration = self
            .registry
            .write()
            .await
            .register(connection_id, identity.clone());

        if registration == Registration::Unchanged {
            tracing::debug!(
                connection_id = %connection_id,
                session = %key,
                "Connection already registered"
            );
            return;
        }

        if self.grace.disarm(&key) {
            tracing::info!(
                exam_id = %identity.exam_id,
                student_id = %identity.student_id,
                "Student reconnected within grace period"
            );
        }

        if self.record_guarded(&key, EventType::Connected).await == Recorded::Terminal {
            self.registry.write().await.mark_submitted(connection_id);
            tracing::debug!(
                session = %key,
                "Submitted student reconnected, presence left unchanged"
            );
            return;
        }

        tracing::info!(
            exam_id = %identity.exam_id,
            student_id = %identity.student_id,
            connection_id = %connection_id,
            "Student connected"
        );
        self.publish(
            &identity.exam_id,
            MonitorEvent::new(&identity, EventType::Connected),
            Delivery::IfApplied,
        )
        .await;
    }

    /// ACTIVITY: focus lost/gained reported by a student client
    pub async fn student_activity(
        &self,
        connection_id: &str,
        identity: StudentIdentity,
        kind: ActivityKind,
    ) {
        let key = identity.session_key();
        let lock = self.session_locks.get(&key);
        let _guard = lock.lock().await;

        let event_type = EventType::from(kind);
        if self.record_guarded(&key, event_type).await == Recorded::Terminal {
            tracing::debug!(
                session = %key,
                connection_id = %connection_id,
                event = %event_type,
                "Dropping activity for submitted student"
            );
            return;
        }

        self.publish(
            &identity.exam_id,
            MonitorEvent::new(&identity, event_type),
            Delivery::IfApplied,
        )
        .await;
    }

    /// SUBMITTED: persists the graded submission, freezes the student's
    /// presence and detaches their connections from the room.
    pub async fn submit(
        &self,
        exam_id: &str,
        student_id: &str,
        score: u32,
        total_questions: u32,
    ) -> Result<()> {
        let key = SessionKey::new(student_id, exam_id);
        let lock = self.session_locks.get(&key);
        let _guard = lock.lock().await;

        let submission_id = self
            .store
            .record_submission(exam_id, student_id, score, total_questions)
            .await?;
        if let Err(e) = self
            .store
            .append_activity_log(submission_id, EventType::Submitted)
            .await
        {
            tracing::error!(
                session = %key,
                submission_id,
                error = %e,
                "Failed to log submission activity"
            );
        }

        self.grace.disarm(&key);

        let identity = self.identity_for(&key).await;
        let connections = self.registry.write().await.mark_key_submitted(&key);
        for connection_id in &connections {
            self.rooms.leave(exam_id, connection_id).await;
        }

        let applied = self
            .publish(
                exam_id,
                MonitorEvent::new(&identity, EventType::Submitted).with_score(score, total_questions),
                Delivery::IfApplied,
            )
            .await;

        tracing::info!(
            exam_id = %exam_id,
            student_id = %student_id,
            score,
            total_questions,
            detached_connections = connections.len(),
            first_submission = applied,
            "Student submitted exam"
        );
        Ok(())
    }

    /// LEAVE: clean exit. Emits DISCONNECTED right away, never a delayed one.
    pub async fn leave_exam(&self, connection_id: &str, exam_id: &str) {
        self.rooms.leave(exam_id, connection_id).await;

        let binding = {
            let mut registry = self.registry.write().await;
            let in_exam = registry
                .binding(connection_id)
                .map(|binding| binding.identity.exam_id == exam_id)
                .unwrap_or(false);
            if in_exam {
                registry.unregister(connection_id)
            } else {
                None
            }
        };

        let Some(binding) = binding else {
            tracing::debug!(
                connection_id = %connection_id,
                exam_id = %exam_id,
                "Observer left exam room"
            );
            return;
        };

        let key = binding.identity.session_key();
        let lock = self.session_locks.get(&key);
        let _guard = lock.lock().await;

        self.grace.disarm(&key);
        self.record_guarded(&key, EventType::LeftExam).await;

        tracing::info!(
            exam_id = %exam_id,
            student_id = %binding.identity.student_id,
            "Student left exam"
        );
        self.publish(
            exam_id,
            MonitorEvent::new(&binding.identity, EventType::Disconnected),
            Delivery::Always,
        )
        .await;
    }

    /// TRANSPORT_CLOSE: the socket is gone. Arms the grace timer when this
    /// was the student's last connection to the exam.
    pub async fn transport_closed(self: &Arc<Self>, connection_id: &str) {
        self.rooms.leave_all(connection_id).await;

        let (binding, has_other) = {
            let mut registry = self.registry.write().await;
            let binding = registry.unregister(connection_id);
            let has_other = binding
                .as_ref()
                .map(|b| {
                    registry.has_other_connection(
                        &b.identity.student_id,
                        &b.identity.exam_id,
                        connection_id,
                    )
                })
                .unwrap_or(false);
            (binding, has_other)
        };

        let Some(binding) = binding else {
            return;
        };

        if binding.submitted {
            tracing::debug!(connection_id = %connection_id, "Submitted student closed connection");
            return;
        }

        if has_other {
            tracing::debug!(
                connection_id = %connection_id,
                student_id = %binding.identity.student_id,
                "Student still has another live connection"
            );
            return;
        }

        let server = Arc::downgrade(self);
        let identity = binding.identity.clone();
        self.grace.arm(binding.identity.session_key(), move || async move {
            if let Some(server) = server.upgrade() {
                server.grace_expired(identity).await;
            }
        });

        tracing::info!(
            exam_id = %binding.identity.exam_id,
            student_id = %binding.identity.student_id,
            grace_secs = self.grace.period().as_secs(),
            "Student connection dropped, waiting for reconnect"
        );
    }

    async fn grace_expired(&self, identity: StudentIdentity) {
        let key = identity.session_key();
        let lock = self.session_locks.get(&key);
        let _guard = lock.lock().await;

        if self.registry.read().await.is_online(&key) {
            tracing::debug!(session = %key, "Student came back before grace expiry");
            return;
        }

        if self
            .publish(
                &identity.exam_id,
                MonitorEvent::new(&identity, EventType::Disconnected),
                Delivery::IfApplied,
            )
            .await
        {
            tracing::info!(
                exam_id = %identity.exam_id,
                student_id = %identity.student_id,
                "Student marked offline after grace period"
            );
        }
    }

    /// Asks every other room member to re-announce its own state
    pub async fn request_status_sync(&self, connection_id: &str, exam_id: &str) -> usize {
        let delivered = self
            .rooms
            .broadcast(
                exam_id,
                &ServerMessage::StatusSyncRequest {
                    exam_id: exam_id.to_string(),
                },
                Some(connection_id),
            )
            .await;
        tracing::debug!(exam_id = %exam_id, delivered, "Status sync requested");
        delivered
    }

    pub async fn relay_ready(
        &self,
        connection_id: &str,
        exam_id: &str,
        student_id: &str,
        extra: Map<String, Value>,
    ) {
        if !self.rooms.is_member(exam_id, connection_id).await {
            tracing::debug!(
                connection_id = %connection_id,
                exam_id = %exam_id,
                "Ignoring webrtc_ready from outside the room"
            );
            return;
        }
        SignalingRelay::new(&self.rooms)
            .ready(connection_id, exam_id, student_id, extra)
            .await;
    }

    pub async fn relay_signal(
        &self,
        connection_id: &str,
        exam_id: &str,
        from_id: &str,
        target_id: &str,
        signal: Value,
    ) {
        if !self.rooms.is_member(exam_id, connection_id).await {
            tracing::debug!(
                connection_id = %connection_id,
                exam_id = %exam_id,
                "Ignoring webrtc_signal from outside the room"
            );
            return;
        }
        SignalingRelay::new(&self.rooms)
            .signal(connection_id, exam_id, from_id, target_id, signal)
            .await;
    }

    /// Seeds the exam's projection from durable participant rows and returns it
    pub async fn snapshot(&self, exam_id: &str) -> Result<Vec<ProjectionEntry>> {
        let participants = self.store.list_participants(exam_id).await?;
        let online = self.registry.read().await.online_students(exam_id);

        let mut projections = self.projections.write().await;
        let projection = projections.entry(exam_id.to_string()).or_default();
        projection.seed(&participants, |student_id| online.contains(student_id));
        Ok(projection.entries())
    }

    pub async fn projection(&self, exam_id: &str) -> Vec<ProjectionEntry> {
        self.projections
            .read()
            .await
            .get(exam_id)
            .map(ExamProjection::entries)
            .unwrap_or_default()
    }

    pub async fn activity_history(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Vec<ActivityLogRecord>> {
        match self.store.find_submission(exam_id, student_id).await? {
            Some(submission_id) => self.store.activity_log(submission_id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn exam_started(&self, exam_id: &str) -> usize {
        self.lifecycle.broadcast_started(exam_id).await
    }

    /// Broadcasts the close, then frees the exam's projection, timers and session locks.
    /// Connections stay in the room until the clients leave.
    pub async fn exam_closed(&self, exam_id: &str) -> usize {
        let delivered = self.lifecycle.broadcast_closed(exam_id).await;
        self.release_exam(exam_id).await;
        delivered
    }

    /// Broadcasts deletion, then drops every piece of live state held for the exam
    pub async fn exam_deleted(&self, exam_id: &str) -> usize {
        let delivered = self.lifecycle.broadcast_deleted(exam_id).await;

        let timers = self.release_exam(exam_id).await;
        let bindings = self.registry.write().await.remove_exam(exam_id);
        let members = self.rooms.close_room(exam_id).await;

        tracing::info!(
            exam_id = %exam_id,
            cancelled_timers = timers,
            bindings = bindings.len(),
            members = members.len(),
            "Tore down monitoring state for deleted exam"
        );
        delivered
    }

    /// Runs one lifecycle tick and releases the live state of every exam it closed
    pub async fn sweep(&self) -> Result<SweepReport> {
        let report = self.lifecycle.sweep(chrono::Utc::now()).await?;
        for exam_id in &report.closed {
            self.release_exam(exam_id).await;
        }
        Ok(report)
    }

    /// Starts the periodic sweep. The task holds a weak reference and ends
    /// once the server is dropped.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut period = self.lifecycle.sweep_interval();
        if period.is_zero() {
            tracing::warn!(
                default_secs = DEFAULT_SWEEP_INTERVAL_SECS,
                "Sweep interval is zero, using default"
            );
            period = Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS);
        }

        let server = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = period.as_secs(), "Exam lifecycle sweep started");

            loop {
                ticker.tick().await;
                let Some(server) = server.upgrade() else {
                    break;
                };
                match server.sweep().await {
                    Ok(report) if !report.closed.is_empty() || !report.started.is_empty() => {
                        tracing::debug!(
                            closed = report.closed.len(),
                            started = report.started.len(),
                            "Sweep tick finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Exam sweep failed"),
                }
            }
        });

        let mut task = self.sweep_task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the sweep and cancels every outstanding grace timer
    pub fn shutdown(&self) {
        let sweep = self
            .sweep_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = sweep {
            handle.abort();
        }

        let cancelled = self.grace.cancel_all();
        tracing::info!(cancelled_timers = cancelled, "Monitor server shut down");
    }

    /// Drops the per-exam projection, grace timers and session locks.
    /// Returns the number of timers cancelled.
    async fn release_exam(&self, exam_id: &str) -> usize {
        let timers = self.grace.disarm_exam(exam_id);
        let released = self.projections.write().await.remove(exam_id).is_some();
        self.session_locks.forget_exam(exam_id);
        tracing::debug!(
            exam_id = %exam_id,
            cancelled_timers = timers,
            released_projection = released,
            "Released live exam state"
        );
        timers
    }

    /// Applies the event to the exam projection and fans it out to the room.
    ///
    /// Both happen under the projection lock so every member observes updates
    /// for one exam in the order they were applied.
    async fn publish(&self, exam_id: &str, event: MonitorEvent, delivery: Delivery) -> bool {
        let mut projections = self.projections.write().await;
        let applied = projections
            .entry(exam_id.to_string())
            .or_default()
            .apply(&event);

        if !applied && delivery == Delivery::IfApplied {
            tracing::debug!(
                exam_id = %exam_id,
                student_id = %event.student_id,
                event = %event.event_type,
                "Suppressed update for submitted student"
            );
            return false;
        }

        let student_id = event.student_id.clone();
        let event_type = event.event_type;
        let delivered = self
            .rooms
            .broadcast(exam_id, &ServerMessage::MonitorUpdate(event), None)
            .await;
        tracing::debug!(
            exam_id = %exam_id,
            student_id = %student_id,
            event = %event_type,
            delivered,
            "Published monitor update"
        );
        applied
    }

    /// Appends an activity record unless the student has submitted.
    ///
    /// The terminal check runs again after the submission lookup, immediately
    /// before the write. Callers hold the session lock for `key`.
    async fn record_guarded(&self, key: &SessionKey, event_type: EventType) -> Recorded {
        if self.is_submitted(key).await {
            return Recorded::Terminal;
        }

        let submission_id = match self
            .store
            .get_or_create_ongoing_submission(&key.exam_id, &key.student_id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    session = %key,
                    event = %event_type,
                    error = %e,
                    "Failed to find or create submission"
                );
                return Recorded::Unlogged;
            }
        };

        if self.is_submitted(key).await {
            return Recorded::Terminal;
        }

        match self.store.append_activity_log(submission_id, event_type).await {
            Ok(()) => Recorded::Logged,
            Err(e) => {
                tracing::error!(
                    session = %key,
                    submission_id,
                    event = %event_type,
                    error = %e,
                    "Failed to append activity log"
                );
                Recorded::Unlogged
            }
        }
    }

    async fn is_submitted(&self, key: &SessionKey) -> bool {
        let projected = self
            .projections
            .read()
            .await
            .get(&key.exam_id)
            .map(|projection| projection.is_submitted(&key.student_id))
            .unwrap_or(false);
        if projected || self.registry.read().await.is_key_submitted(key) {
            return true;
        }

        match self
            .store
            .submission_status(&key.exam_id, &key.student_id)
            .await
        {
            Ok(status) => status == Some(SubmissionStatus::Submitted),
            Err(e) => {
                tracing::warn!(session = %key, error = %e, "Failed to read submission status");
                false
            }
        }
    }

    /// Best available display identity for a student addressed only by id
    async fn identity_for(&self, key: &SessionKey) -> StudentIdentity {
        if let Some(identity) = self.registry.read().await.identity_for(key) {
            return identity;
        }

        if let Some(entry) = self
            .projections
            .read()
            .await
            .get(&key.exam_id)
            .and_then(|projection| projection.get(&key.student_id).cloned())
        {
            return StudentIdentity {
                exam_id: key.exam_id.clone(),
                student_id: key.student_id.clone(),
                student_name: entry.student_name,
                picture: entry.student_picture,
            };
        }

        let participant = match self.store.list_participants(&key.exam_id).await {
            Ok(participants) => participants.into_iter().find(|p| p.id == key.student_id),
            Err(e) => {
                tracing::warn!(session = %key, error = %e, "Failed to look up participant");
                None
            }
        };

        StudentIdentity {
            exam_id: key.exam_id.clone(),
            student_id: key.student_id.clone(),
            student_name: participant
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_else(|| key.student_id.clone()),
            picture: participant.and_then(|p| p.picture),
        }
    }
}

impl Drop for MonitorServer {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweep_task
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}
