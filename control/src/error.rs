//! Error types for the motion control runtime

use thiserror::Error;

/// Result type alias for the control runtime
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors raised while reading frames, loading configuration or driving the
/// actuator
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Actuator not connected")]
    ActuatorDisconnected,

    #[error("Actuator write failed: {0}")]
    ActuatorWrite(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("Malformed configuration: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ControlError {
    pub fn actuator_write<S: Into<String>>(msg: S) -> Self {
        Self::ActuatorWrite(msg.into())
    }

    pub fn invalid_frame<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFrame(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_failure_converts() {
        let err: ControlError = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert!(matches!(err, ControlError::SerializationError(_)));
        assert!(err.to_string().starts_with("Malformed configuration"));
    }

    #[test]
    fn test_messages_carry_detail() {
        assert_eq!(
            ControlError::actuator_write("port closed").to_string(),
            "Actuator write failed: port closed"
        );
        assert_eq!(
            ControlError::invalid_frame("fov 0").to_string(),
            "Invalid frame: fov 0"
        );
    }
}
