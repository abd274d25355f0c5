use thiserror::Error;

/// Custom error types for the classroom relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Session lifecycle errors
    #[error("No classroom is currently open")]
    ClassroomClosed,

    #[error("An interaction is already active")]
    InteractionActive,

    #[error("Operation is only valid on the hub node")]
    NotHub,

    #[error("Peer {0} not found")]
    PeerNotFound(String),

    /// Channel and delivery errors
    #[error("Channel to peer {0} is closed")]
    ChannelClosed(String),

    #[error("No hub channel is attached")]
    HubNotAttached,

    /// Wire format errors
    #[error("Failed to serialize envelope: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Data validation errors
    #[error("Invalid multiple-choice question: {0}")]
    InvalidQuestion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        RelayError::Internal(msg.into())
    }

    /// Helper to create question validation errors
    pub fn invalid_question(msg: impl Into<String>) -> Self {
        RelayError::InvalidQuestion(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::PeerNotFound("ipad-7".to_string());
        assert_eq!(err.to_string(), "Peer ipad-7 not found");
    }

    #[test]
    fn test_error_helpers() {
        let err = RelayError::internal("Something went wrong");
        assert!(matches!(err, RelayError::Internal(_)));
    }
}
