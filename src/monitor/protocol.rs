use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::events::{ActivityKind, ExamId, MonitorEvent, StudentId};
use super::projection::ProjectionEntry;

/// Messages a student or proctor client sends over the real-time channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinExam {
        #[serde(deserialize_with = "flexible_id::deserialize")]
        exam_id: ExamId,
        #[serde(
            default,
            deserialize_with = "flexible_id::deserialize_opt",
            skip_serializing_if = "Option::is_none"
        )]
        student_id: Option<StudentId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        student_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        picture: Option<String>,
    },

    StudentActivity {
        #[serde(deserialize_with = "flexible_id::deserialize")]
        exam_id: ExamId,
        #[serde(deserialize_with = "flexible_id::deserialize")]
        student_id: StudentId,
        student_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        picture: Option<String>,
        event_type: ActivityKind,
    },

    LeaveExam {
        #[serde(deserialize_with = "flexible_id::deserialize")]
        exam_id: ExamId,
    },

    RequestStatusSync {
        #[serde(deserialize_with = "flexible_id::deserialize")]
        exam_id: ExamId,
    },

    WebrtcSignal {
        #[serde(deserialize_with = "flexible_id::deserialize")]
        exam_id: ExamId,
        #[serde(deserialize_with = "flexible_id::deserialize")]
        target_id: String,
        #[serde(deserialize_with = "flexible_id::deserialize")]
        from_id: String,
        signal: Value,
    },

    WebrtcReady {
        #[serde(deserialize_with = "flexible_id::deserialize")]
        exam_id: ExamId,
        #[serde(deserialize_with = "flexible_id::deserialize")]
        student_id: StudentId,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl ClientMessage {
    pub fn exam_id(&self) -> &str {
        match self {
            ClientMessage::JoinExam { exam_id, .. }
            | ClientMessage::StudentActivity { exam_id, .. }
            | ClientMessage::LeaveExam { exam_id }
            | ClientMessage::RequestStatusSync { exam_id }
            | ClientMessage::WebrtcSignal { exam_id, .. }
            | ClientMessage::WebrtcReady { exam_id, .. } => exam_id,
        }
    }
}

/// Messages the server pushes to room members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    MonitorUpdate(MonitorEvent),

    MonitorSnapshot {
        exam_id: ExamId,
        students: Vec<ProjectionEntry>,
    },

    StatusSyncRequest {
        exam_id: ExamId,
    },

    WebrtcSignal {
        exam_id: ExamId,
        target_id: String,
        from_id: String,
        signal: Value,
    },

    WebrtcReady {
        exam_id: ExamId,
        student_id: StudentId,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    ExamStarted {
        exam_id: ExamId,
    },

    ExamClosed {
        exam_id: ExamId,
    },

    ExamDeleted {
        exam_id: ExamId,
    },
}

/// Identifiers arrive as strings from some clients and as database integers from others
pub(crate) mod flexible_id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    impl From<RawId> for String {
        fn from(raw: RawId) -> Self {
            match raw {
                RawId::Text(text) => text,
                RawId::Unsigned(n) => n.to_string(),
                RawId::Signed(n) => n.to_string(),
            }
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawId::deserialize(deserializer).map(String::from)
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::events::{EventType, StudentIdentity};
    use serde_json::json;

    #[test]
    fn test_parse_student_join() {
        let raw = json!({
            "type": "join_exam",
            "examId": 12,
            "studentId": "s1",
            "studentName": "Ada",
            "picture": "https://example.com/ada.png"
        });

        let message: ClientMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.exam_id(), "12");
        assert_eq!(
            message,
            ClientMessage::JoinExam {
                exam_id: "12".to_string(),
                student_id: Some("s1".to_string()),
                student_name: Some("Ada".to_string()),
                picture: Some("https://example.com/ada.png".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_proctor_join_without_identity() {
        let message: ClientMessage =
            serde_json::from_value(json!({ "type": "join_exam", "examId": "e1" })).unwrap();

        match message {
            ClientMessage::JoinExam { student_id, .. } => assert!(student_id.is_none()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_activity_with_unknown_event_is_rejected() {
        let raw = json!({
            "type": "student_activity",
            "examId": "e1",
            "studentId": "s1",
            "studentName": "Ada",
            "eventType": "SUBMITTED"
        });
        assert!(serde_json::from_value::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let raw = json!({ "type": "webrtc_signal", "examId": "e1", "targetId": "s1" });
        assert!(serde_json::from_value::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn test_webrtc_ready_keeps_extra_fields() {
        let raw = json!({
            "type": "webrtc_ready",
            "examId": "e1",
            "studentId": 7,
            "hasVideo": true
        });

        let message: ClientMessage = serde_json::from_value(raw).unwrap();
        match message {
            ClientMessage::WebrtcReady { student_id, extra, .. } => {
                assert_eq!(student_id, "7");
                assert_eq!(extra.get("hasVideo"), Some(&json!(true)));
                assert!(extra.get("type").is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_monitor_update_wire_shape() {
        let identity = StudentIdentity {
            exam_id: "e1".to_string(),
            student_id: "s1".to_string(),
            student_name: "Ada".to_string(),
            picture: None,
        };
        let message = ServerMessage::MonitorUpdate(MonitorEvent::new(&identity, EventType::FocusLost));

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "monitor_update");
        assert_eq!(json["studentId"], "s1");
        assert_eq!(json["eventType"], "FOCUS_LOST");

        let parsed: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_lifecycle_wire_names() {
        let json = serde_json::to_value(ServerMessage::ExamClosed {
            exam_id: "e1".to_string(),
        })
        .unwrap();
        assert_eq!(json, json!({ "type": "exam_closed", "examId": "e1" }));

        let json = serde_json::to_value(ServerMessage::StatusSyncRequest {
            exam_id: "e1".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "status_sync_request");
    }
}
