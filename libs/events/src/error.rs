//! Error types for trigger payload handling.

use thiserror::Error;

/// Errors that can occur when validating a lifecycle event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// A required detail field is absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A detail field is present but malformed.
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The payload does not have the envelope shape at all.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Malformed(err.to_string())
    }
}
