//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or validating provider payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON could not be parsed into the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload parsed but is missing something the engine needs.
    #[error("invalid {entity} payload: {message}")]
    InvalidPayload {
        /// Kind of item, e.g. `note`.
        entity: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid payload error.
    pub fn invalid(entity: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            entity,
            message: message.into(),
        }
    }
}
