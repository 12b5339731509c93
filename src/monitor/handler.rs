use rand::Rng;
use std::sync::Arc;

use super::events::{ConnectionId, StudentIdentity};
use super::protocol::ClientMessage;
use super::rooms::ClientSender;
use super::server::MonitorServer;

/// Per-connection dispatcher between the socket and the [`MonitorServer`]
pub struct MonitorSignalingHandler {
    server: Arc<MonitorServer>,
    connection_id: ConnectionId,
    sender: ClientSender,
}

impl MonitorSignalingHandler {
    pub fn new(server: Arc<MonitorServer>, sender: ClientSender) -> Self {
        let connection_id = format!("conn-{:016x}", rand::thread_rng().gen::<u64>());
        Self {
            server,
            connection_id,
            sender,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Parses one text frame. Malformed frames are logged and dropped.
    pub async fn handle_text(&mut self, text: &str) {
        tracing::debug!(connection_id = %self.connection_id, "Received monitor message: {}", text);

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse monitor message"
                );
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        tracing::debug!(
            connection_id = %self.connection_id,
            exam_id = %message.exam_id(),
            "Handling client message"
        );
        match message {
            ClientMessage::JoinExam {
                exam_id,
                student_id,
                student_name,
                picture,
            } => {
                let identity = student_id.map(|student_id| StudentIdentity {
                    exam_id: exam_id.clone(),
                    student_name: student_name.unwrap_or_else(|| student_id.clone()),
                    student_id,
                    picture,
                });
                self.server
                    .join_exam(&self.connection_id, self.sender.clone(), &exam_id, identity)
                    .await;
            }

            ClientMessage::StudentActivity {
                exam_id,
                student_id,
                student_name,
                picture,
                event_type,
            } => {
                let identity = StudentIdentity {
                    exam_id,
                    student_id,
                    student_name,
                    picture,
                };
                self.server
                    .student_activity(&self.connection_id, identity, event_type)
                    .await;
            }

            ClientMessage::LeaveExam { exam_id } => {
                self.server.leave_exam(&self.connection_id, &exam_id).await;
            }

            ClientMessage::RequestStatusSync { exam_id } => {
                self.server
                    .request_status_sync(&self.connection_id, &exam_id)
                    .await;
            }

            ClientMessage::WebrtcSignal {
                exam_id,
                target_id,
                from_id,
                signal,
            } => {
                self.server
                    .relay_signal(&self.connection_id, &exam_id, &from_id, &target_id, signal)
                    .await;
            }

            ClientMessage::WebrtcReady {
                exam_id,
                student_id,
                extra,
            } => {
                self.server
                    .relay_ready(&self.connection_id, &exam_id, &student_id, extra)
                    .await;
            }
        }
    }

    pub async fn cleanup(&self) {
        tracing::debug!(connection_id = %self.connection_id, "Cleaning up monitor connection");
        self.server.transport_closed(&self.connection_id).await;
    }
}
