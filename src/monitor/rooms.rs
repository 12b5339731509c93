use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use super::events::{ConnectionId, ExamId};
use super::protocol::ServerMessage;

pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Per-exam room membership: every live connection subscribed to one exam's updates
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<ExamId, HashMap<ConnectionId, ClientSender>>>>,
}

impl RoomManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Subscribes a connection to an exam room; returns false if it was already a member
    pub async fn join(&self, exam_id: &str, connection_id: &str, sender: ClientSender) -> bool {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(exam_id.to_string()).or_default();
        let joined = room.insert(connection_id.to_string(), sender).is_none();

        if joined {
            tracing::debug!(
                exam_id = %exam_id,
                connection_id = %connection_id,
                members = room.len(),
                "Connection joined exam room"
            );
        }
        joined
    }

    pub async fn leave(&self, exam_id: &str, connection_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(exam_id) else {
            return false;
        };

        let removed = room.remove(connection_id).is_some();
        if room.is_empty() {
            rooms.remove(exam_id);
            tracing::debug!(exam_id = %exam_id, "Exam room emptied");
        }
        removed
    }

    /// Removes a connection from every room, returning the exams it was subscribed to
    pub async fn leave_all(&self, connection_id: &str) -> Vec<ExamId> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();

        rooms.retain(|exam_id, room| {
            if room.remove(connection_id).is_some() {
                left.push(exam_id.clone());
            }
            !room.is_empty()
        });

        left
    }

    /// Drops the whole room, returning the connections that were in it
    pub async fn close_room(&self, exam_id: &str) -> Vec<ConnectionId> {
        let mut rooms = self.rooms.write().await;
        rooms
            .remove(exam_id)
            .map(|room| room.into_keys().collect())
            .unwrap_or_default()
    }

    /// Sends `message` to every member of the room except `except`, returning the delivery count.
    ///
    /// Delivery is synchronous into each member's outbound queue, so the
    /// order of successive broadcasts is the order members observe.
    pub async fn broadcast(&self, exam_id: &str, message: &ServerMessage, except: Option<&str>) -> usize {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(exam_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (connection_id, sender) in room {
            if Some(connection_id.as_str()) == except {
                continue;
            }

            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(
                    exam_id = %exam_id,
                    connection_id = %connection_id,
                    "Skipping closed connection during broadcast"
                );
            }
        }

        delivered
    }

    pub async fn send_to(&self, exam_id: &str, connection_id: &str, message: ServerMessage) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(exam_id)
            .and_then(|room| room.get(connection_id))
            .map(|sender| sender.send(message).is_ok())
            .unwrap_or(false)
    }

    pub async fn members(&self, exam_id: &str) -> HashSet<ConnectionId> {
        let rooms = self.rooms.read().await;
        rooms
            .get(exam_id)
            .map(|room| room.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_member(&self, exam_id: &str, connection_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(exam_id)
            .map(|room| room.contains_key(connection_id))
            .unwrap_or(false)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(exam_id: &str) -> ServerMessage {
        ServerMessage::ExamClosed {
            exam_id: exam_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let rooms = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(rooms.join("e1", "c1", tx.clone()).await);
        assert!(!rooms.join("e1", "c1", tx).await);
        assert_eq!(rooms.members("e1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender_and_other_rooms() {
        let rooms = RoomManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        rooms.join("e1", "c1", tx1).await;
        rooms.join("e1", "c2", tx2).await;
        rooms.join("e2", "c3", tx3).await;

        let delivered = rooms.broadcast("e1", &closed("e1"), Some("c1")).await;
        assert_eq!(delivered, 1);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), closed("e1"));
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_tolerates_dropped_receivers() {
        let rooms = RoomManager::new();
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        rooms.join("e1", "c1", tx1).await;
        rooms.join("e1", "c2", tx2).await;
        drop(rx1);

        assert_eq!(rooms.broadcast("e1", &closed("e1"), None).await, 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_leave_all_and_empty_room_cleanup() {
        let rooms = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        rooms.join("e1", "c1", tx.clone()).await;
        rooms.join("e2", "c1", tx.clone()).await;
        rooms.join("e2", "c2", tx).await;

        let mut left = rooms.leave_all("c1").await;
        left.sort();
        assert_eq!(left, vec!["e1".to_string(), "e2".to_string()]);
        assert_eq!(rooms.room_count().await, 1);

        assert!(rooms.leave("e2", "c2").await);
        assert!(!rooms.leave("e2", "c2").await);
        assert_eq!(rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_room() {
        let rooms = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        rooms.join("e1", "c1", tx.clone()).await;
        rooms.join("e1", "c2", tx).await;

        let mut closed = rooms.close_room("e1").await;
        closed.sort();
        assert_eq!(closed, vec!["c1".to_string(), "c2".to_string()]);
        assert!(!rooms.is_member("e1", "c1").await);
    }
}
