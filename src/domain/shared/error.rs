//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Wrap a WebRTC engine failure
    pub fn media(err: impl std::fmt::Display) -> Self {
        DomainError::Media(err.to_string())
    }

    /// Wrap a malformed payload failure
    pub fn protocol(err: impl std::fmt::Display) -> Self {
        DomainError::Protocol(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Protocol(err.to_string())
    }
}
