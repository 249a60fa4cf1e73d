//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when decoding events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The subject names a resource kind this service does not manage.
    #[error("unknown resource kind '{kind}' in subject '{subject}'")]
    UnknownResourceKind { kind: String, subject: String },

    /// The subject is empty.
    #[error("empty subject")]
    EmptySubject,

    /// The event payload is invalid.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            EventError::InvalidPayload(err.to_string())
        } else {
            EventError::Serialization(err.to_string())
        }
    }
}
