//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A realtime frame could not be parsed as an event
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] serde_json::Error),

    /// Session identifier is not a valid UUID
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// I/O error; `Decoder` implementations must accept one
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
