use thiserror::Error;

use crate::transport::TransportError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Capture source unavailable: {0}")]
    Acquisition(String),

    #[error("Capture source produced no frames: {0}")]
    Playback(String),

    #[error("Frame encoding failed: {0}")]
    Encoding(String),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Whether the error requires user action (permission, device) and must
    /// reach the consumer. Per-frame failures are absorbed by the pipeline.
    pub fn is_actionable(&self) -> bool {
        matches!(self, AppError::Acquisition(_) | AppError::Playback(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actionable_errors() {
        assert!(AppError::Acquisition("permission denied".into()).is_actionable());
        assert!(AppError::Playback("no frames".into()).is_actionable());
        assert!(!AppError::Encoding("empty".into()).is_actionable());
        assert!(!AppError::Transport(TransportError::TimedOut).is_actionable());
    }

    #[test]
    fn test_display() {
        let err = AppError::Acquisition("permission denied".into());
        assert_eq!(err.to_string(), "Capture source unavailable: permission denied");
    }
}
