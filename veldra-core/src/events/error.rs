//! Error types for the event system.

use thiserror::Error;

/// Error returned by event handlers.
///
/// A failing handler never affects the publisher; the event and the
/// subscription id land in the dead-letter queue instead.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct EventError {
    /// Human-readable description of the handler failure.
    pub message: String,
}

impl EventError {
    /// Create a new handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<String> for EventError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for EventError {
    fn from(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

/// Result type for event handler invocations.
pub type EventResult<T> = Result<T, EventError>;
