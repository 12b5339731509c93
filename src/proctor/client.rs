use std::collections::HashMap;
use std::sync::Arc;
use serde_json::Value;
use tokio::sync::mpsc;
use webrtc::api::API;
use webrtc::ice_transport::ice_server::RTCIceServer;

use super::peer::{signal_message, PeerLink, PeerSignal};
use super::webrtc_utils::{create_webrtc_api, ice_servers};
use crate::config::IceConfig;
use crate::error::{MonitorError, Result};
use crate::monitor::{
    ClientMessage, EventType, ExamId, ExamProjection, ServerMessage, StudentId,
};

/// Proctor-side signaling client.
///
/// Owns the proctor's copy of the projection and every peer connection it
/// holds to students. Peers are torn down only on a SUBMITTED or DISCONNECTED
/// update for that student, or when the exam closes.
pub struct ProctorPeers {
    exam_id: ExamId,
    proctor_id: String,
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    projection: ExamProjection,
    peers: HashMap<StudentId, PeerLink>,
}

impl ProctorPeers {
    pub fn new(
        exam_id: &str,
        proctor_id: &str,
        ice: &IceConfig,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> Result<Self> {
        Ok(Self {
            exam_id: exam_id.to_string(),
            proctor_id: proctor_id.to_string(),
            api: create_webrtc_api()?,
            ice_servers: ice_servers(ice),
            outbound,
            projection: ExamProjection::new(),
            peers: HashMap::new(),
        })
    }

    /// Observer join: no student identity, so the server answers with a snapshot
    pub fn join_message(&self) -> ClientMessage {
        ClientMessage::JoinExam {
            exam_id: self.exam_id.clone(),
            student_id: None,
            student_name: None,
            picture: None,
        }
    }

    pub fn projection(&self) -> &ExamProjection {
        &self.projection
    }

    pub fn has_peer(&self, student_id: &str) -> bool {
        self.peers.contains_key(student_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub async fn handle(&mut self, message: ServerMessage) -> Result<()> {
        match message {
            ServerMessage::MonitorSnapshot { exam_id, students } if exam_id == self.exam_id => {
                tracing::info!(exam_id = %exam_id, students = students.len(), "Received projection snapshot");
                self.projection.replace(students);
            }

            ServerMessage::MonitorUpdate(event) => {
                self.projection.apply(&event);
                if matches!(event.event_type, EventType::Submitted | EventType::Disconnected) {
                    self.close_and_discard(&event.student_id).await;
                }
            }

            ServerMessage::WebrtcReady {
                exam_id,
                student_id,
                ..
            } if exam_id == self.exam_id => {
                self.initiate(&student_id).await?;
            }

            ServerMessage::WebrtcSignal {
                exam_id,
                target_id,
                from_id,
                signal,
            } if exam_id == self.exam_id && target_id == self.proctor_id => {
                self.apply_signal(&from_id, signal).await?;
            }

            ServerMessage::ExamClosed { exam_id } | ServerMessage::ExamDeleted { exam_id }
                if exam_id == self.exam_id =>
            {
                self.close_all().await;
            }

            _ => {}
        }
        Ok(())
    }

    /// Offers a connection to a student that announced readiness.
    ///
    /// Returns false without creating anything when the student has already
    /// submitted or a connection to them already exists.
    pub async fn initiate(&mut self, student_id: &str) -> Result<bool> {
        if self.projection.is_submitted(student_id) {
            tracing::debug!(student_id = %student_id, "Skipping submitted student");
            return Ok(false);
        }
        if self.peers.contains_key(student_id) {
            return Ok(false);
        }

        let link = PeerLink::new(
            &self.api,
            self.ice_servers.clone(),
            &self.exam_id,
            &self.proctor_id,
            student_id,
            self.outbound.clone(),
        )
        .await?;
        let sdp = link.create_offer().await?;
        self.peers.insert(student_id.to_string(), link);

        let message = signal_message(
            &self.exam_id,
            &self.proctor_id,
            student_id,
            &PeerSignal::Offer { sdp },
        )?;
        self.outbound
            .send(message)
            .map_err(|_| MonitorError::ChannelClosed(self.proctor_id.clone()))?;

        tracing::info!(student_id = %student_id, "Sent offer to student");
        Ok(true)
    }

    pub async fn apply_signal(&mut self, from_id: &str, signal: Value) -> Result<()> {
        let signal: PeerSignal = serde_json::from_value(signal)?;
        let link = self
            .peers
            .get_mut(from_id)
            .ok_or_else(|| MonitorError::PeerNotFound(from_id.to_string()))?;

        match signal {
            PeerSignal::Answer { sdp } => link.handle_answer(&sdp).await,
            PeerSignal::Candidate { candidate } => link.add_ice_candidate(candidate).await,
            PeerSignal::Offer { .. } => Err(MonitorError::invalid_message(
                "proctor does not accept offers",
            )),
        }
    }

    pub async fn close_and_discard(&mut self, student_id: &str) -> bool {
        match self.peers.remove(student_id) {
            Some(link) => {
                link.close().await;
                tracing::info!(student_id = %student_id, "Closed peer for student");
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&mut self) {
        for (_, link) in self.peers.drain() {
            link.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MonitorEvent, ProjectionEntry, StudentIdentity, StudentStatus};
    use chrono::Utc;

    fn proctor() -> (ProctorPeers, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peers = ProctorPeers::new("e1", "proctor-1", &IceConfig::default(), tx).unwrap();
        (peers, rx)
    }

    fn entry(student_id: &str, status: StudentStatus) -> ProjectionEntry {
        ProjectionEntry {
            student_id: student_id.to_string(),
            student_name: student_id.to_string(),
            student_picture: None,
            status,
            last_update: Utc::now(),
            score: None,
            total_questions: None,
        }
    }

    #[tokio::test]
    async fn test_snapshot_replaces_projection() {
        let (mut peers, _rx) = proctor();
        peers
            .handle(ServerMessage::MonitorSnapshot {
                exam_id: "e1".to_string(),
                students: vec![entry("s1", StudentStatus::Focused), entry("s2", StudentStatus::Offline)],
            })
            .await
            .unwrap();

        assert_eq!(peers.projection().len(), 2);
        assert_eq!(peers.projection().status("s2"), Some(StudentStatus::Offline));
    }

    #[tokio::test]
    async fn test_ready_from_submitted_student_is_ignored() {
        let (mut peers, mut rx) = proctor();
        peers
            .handle(ServerMessage::MonitorSnapshot {
                exam_id: "e1".to_string(),
                students: vec![entry("s1", StudentStatus::Submitted)],
            })
            .await
            .unwrap();

        peers
            .handle(ServerMessage::WebrtcReady {
                exam_id: "e1".to_string(),
                student_id: "s1".to_string(),
                extra: Default::default(),
            })
            .await
            .unwrap();

        assert_eq!(peers.peer_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_updates_fold_into_projection() {
        let (mut peers, _rx) = proctor();
        let identity = StudentIdentity {
            exam_id: "e1".to_string(),
            student_id: "s1".to_string(),
            student_name: "Ada".to_string(),
            picture: None,
        };

        for event_type in [EventType::Connected, EventType::FocusLost] {
            peers
                .handle(ServerMessage::MonitorUpdate(MonitorEvent::new(&identity, event_type)))
                .await
                .unwrap();
        }
        assert_eq!(peers.projection().status("s1"), Some(StudentStatus::Away));

        // No peer was ever opened, so closing finds nothing
        assert!(!peers.close_and_discard("s1").await);
    }

    #[tokio::test]
    async fn test_signal_for_unknown_peer_is_rejected() {
        let (mut peers, _rx) = proctor();
        let result = peers
            .apply_signal("s9", serde_json::json!({ "type": "answer", "sdp": "v=0" }))
            .await;
        assert!(matches!(result, Err(MonitorError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn test_signals_for_other_proctors_are_ignored() {
        let (mut peers, _rx) = proctor();
        let result = peers
            .handle(ServerMessage::WebrtcSignal {
                exam_id: "e1".to_string(),
                target_id: "proctor-2".to_string(),
                from_id: "s1".to_string(),
                signal: serde_json::json!({ "type": "answer", "sdp": "v=0" }),
            })
            .await;
        assert!(result.is_ok());
    }
}
