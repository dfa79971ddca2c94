//! Error types for the storage mirror.

use thiserror::Error;

/// Failure reported by a storage backend for a single read or write.
///
/// Backends may or may not supply a message. The error slot of a synchronized
/// record receives the message, or an empty string when there is none.
#[derive(Clone, Debug, Default, PartialEq, Eq, Error)]
#[error("{}", .message.as_deref().unwrap_or("storage operation failed"))]
pub struct StoreFailure {
    message: Option<String>,
}

impl StoreFailure {
    /// Failure carrying a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// Failure without any message.
    pub fn silent() -> Self {
        Self { message: None }
    }

    /// Failure from an optional message.
    pub fn from_message(message: Option<&str>) -> Self {
        Self {
            message: message.map(str::to_string),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The message, or `""` when the backend supplied none.
    pub fn message_or_empty(&self) -> String {
        self.message.clone().unwrap_or_default()
    }
}

/// Main error type for mirror operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreFailure),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown storage area: {0}")]
    InvalidArea(String),
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        MirrorError::Serialization(e.to_string())
    }
}

/// Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_fallback() {
        assert_eq!(StoreFailure::new("boom").message_or_empty(), "boom");
        assert_eq!(StoreFailure::silent().message_or_empty(), "");
        assert_eq!(StoreFailure::from_message(None), StoreFailure::silent());
    }

    #[test]
    fn test_failure_converts_into_mirror_error() {
        let err: MirrorError = StoreFailure::new("quota").into();
        assert!(matches!(err, MirrorError::Store(_)));
        assert_eq!(err.to_string(), "Storage error: quota");
    }
}
