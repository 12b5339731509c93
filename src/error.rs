use thiserror::Error;

/// Error types for the exam monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Storage collaborator errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Exam {0} not found")]
    ExamNotFound(String),

    #[error("Submission {0} not found")]
    SubmissionNotFound(u64),

    /// Wire protocol errors
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Connection {0} is closed")]
    ChannelClosed(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to read seed file: {0}")]
    SeedFile(#[from] std::io::Error),

    /// Proctor-side peer connection errors
    #[error("WebRTC API error: {0}")]
    WebRtcApi(String),

    #[error("Peer {0} not found")]
    PeerNotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    pub fn storage(msg: impl Into<String>) -> Self {
        MonitorError::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MonitorError::Internal(msg.into())
    }

    pub fn invalid_message(msg: impl Into<String>) -> Self {
        MonitorError::InvalidMessage(msg.into())
    }
}

impl From<webrtc::Error> for MonitorError {
    fn from(err: webrtc::Error) -> Self {
        MonitorError::WebRtcApi(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonitorError::ExamNotFound("exam-1".to_string());
        assert_eq!(err.to_string(), "Exam exam-1 not found");

        let err = MonitorError::SubmissionNotFound(42);
        assert_eq!(err.to_string(), "Submission 42 not found");
    }

    #[test]
    fn test_error_helpers() {
        assert!(matches!(MonitorError::storage("disk full"), MonitorError::Storage(_)));
        assert!(matches!(MonitorError::internal("oops"), MonitorError::Internal(_)));
        assert!(matches!(
            MonitorError::invalid_message("missing examId"),
            MonitorError::InvalidMessage(_)
        ));
    }

    #[test]
    fn test_serde_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: MonitorError = parse.unwrap_err().into();
        assert!(matches!(err, MonitorError::SerializationFailed(_)));
    }
}
