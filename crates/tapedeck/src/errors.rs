use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serializable capsule for an application-level failure raised by an
/// intercepted call or by the operation itself. This is what gets stored
/// in a recording under an `exception` tag and re-raised during playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: String,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TapedeckError {
    #[error("input interception key creation error: {0}")]
    InputKeyCreation(String),
    #[error("key '{0}' not found in recording")]
    RecordingKey(String),
    #[error("no such recording: {0}")]
    NoSuchRecording(String),
    #[error("recorder state error: {0}")]
    State(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("equalizer worker error: {0}")]
    Worker(String),
    /// The operation (or an intercepted call) failed with an
    /// application-level error.
    #[error("operation error: {0}")]
    Operation(OperationError),
    /// Internal discriminant: the played-back operation raised, and that
    /// failure was captured as a recorded output. `Recorder::play`
    /// swallows this; it never surfaces to callers of `play`.
    #[error("operation raised during playback")]
    OperationDuringPlayback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_round_trips_json() {
        let err = OperationError::new("ValueError", "bad input");
        let json = serde_json::to_string(&err).expect("serialize");
        let back: OperationError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, err);
    }

    #[test]
    fn error_messages_are_stable() {
        let err = TapedeckError::RecordingKey("input: db args=[]".to_string());
        assert_eq!(
            err.to_string(),
            "key 'input: db args=[]' not found in recording"
        );
    }
}
