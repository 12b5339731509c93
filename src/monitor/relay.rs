use serde_json::{Map, Value};

use super::protocol::ServerMessage;
use super::rooms::RoomManager;

/// Content-blind forwarding of WebRTC negotiation between a proctor and a student.
///
/// Holds no per-pair state: payloads are forwarded to every other member of
/// the exam room and the two endpoints pick out what is addressed to them.
/// Business checks (such as skipping submitted students) live with the
/// initiating proctor.
pub struct SignalingRelay<'a> {
    rooms: &'a RoomManager,
}

impl<'a> SignalingRelay<'a> {
    pub fn new(rooms: &'a RoomManager) -> Self {
        Self { rooms }
    }

    /// Announces a student's readiness to stream to the rest of the room
    pub async fn ready(
        &self,
        sender_connection: &str,
        exam_id: &str,
        student_id: &str,
        extra: Map<String, Value>,
    ) -> usize {
        let message = ServerMessage::WebrtcReady {
            exam_id: exam_id.to_string(),
            student_id: student_id.to_string(),
            extra,
        };

        let delivered = self
            .rooms
            .broadcast(exam_id, &message, Some(sender_connection))
            .await;
        tracing::debug!(
            exam_id = %exam_id,
            student_id = %student_id,
            delivered,
            "Relayed webrtc_ready"
        );
        delivered
    }

    /// Forwards an opaque offer/answer/candidate payload to the rest of the room
    pub async fn signal(
        &self,
        sender_connection: &str,
        exam_id: &str,
        from_id: &str,
        target_id: &str,
        signal: Value,
    ) -> usize {
        let message = ServerMessage::WebrtcSignal {
            exam_id: exam_id.to_string(),
            target_id: target_id.to_string(),
            from_id: from_id.to_string(),
            signal,
        };

        let delivered = self
            .rooms
            .broadcast(exam_id, &message, Some(sender_connection))
            .await;
        tracing::debug!(
            exam_id = %exam_id,
            from_id = %from_id,
            target_id = %target_id,
            delivered,
            "Relayed webrtc_signal"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_signal_reaches_everyone_but_sender_untouched() {
        let rooms = RoomManager::new();
        let (proctor_tx, mut proctor_rx) = mpsc::unbounded_channel();
        let (student_tx, mut student_rx) = mpsc::unbounded_channel();
        rooms.join("e1", "proctor-conn", proctor_tx).await;
        rooms.join("e1", "student-conn", student_tx).await;

        let offer = json!({ "type": "offer", "sdp": "v=0\r\n..." });
        let relay = SignalingRelay::new(&rooms);
        let delivered = relay
            .signal("proctor-conn", "e1", "proctor-1", "s1", offer.clone())
            .await;

        assert_eq!(delivered, 1);
        assert!(proctor_rx.try_recv().is_err());
        assert_eq!(
            student_rx.try_recv().unwrap(),
            ServerMessage::WebrtcSignal {
                exam_id: "e1".to_string(),
                target_id: "s1".to_string(),
                from_id: "proctor-1".to_string(),
                signal: offer,
            }
        );
    }

    #[tokio::test]
    async fn test_ready_in_empty_room_is_harmless() {
        let rooms = RoomManager::new();
        let relay = SignalingRelay::new(&rooms);
        assert_eq!(relay.ready("c1", "e1", "s1", Map::new()).await, 0);
    }
}
