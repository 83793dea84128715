//! Error types for cps-client.

use thiserror::Error;

use crate::export::ExportStatus;

/// Coarse classification of a [`CpsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket failure: connect, short read/write, closed connection.
    Transport,
    /// The peer sent something this client cannot decode.
    Protocol,
    /// The peer understood the request and rejected it.
    Application,
    /// A request waited longer than its deadline.
    Timeout,
    /// The caller cancelled the operation.
    Aborted,
}

/// Main error type for all CPS operations.
#[derive(Debug, Error)]
pub enum CpsError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error while building an outgoing body.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The messenger or client is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Packet did not start with the expected magic bytes.
    #[error("Packet header mismatch")]
    HeaderMismatch,

    /// Packet carried a protocol version other than the negotiated one.
    #[error("Unsupported protocol version {actual} (expected {expected})")]
    UnsupportedVersion { expected: u16, actual: u16 },

    /// Control message payload is not a valid envelope.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Control message `type` is not one of request/response/update.
    #[error("Invalid message type: {0}")]
    InvalidMessageType(String),

    /// Any other framing violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Response session id differs from the one the request was sent with.
    #[error("Invalid session: expected '{expected}', got '{actual}'")]
    InvalidSession { expected: String, actual: String },

    /// Server answered with a non-empty `error.name`.
    #[error("Server error {name}: {description}")]
    Server { name: String, description: String },

    /// Response body failed typed parsing.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// No response arrived before the request deadline.
    #[error("Request timed out")]
    Timeout,

    /// A pending request was abandoned before a response was delivered.
    #[error("Broken promise")]
    BrokenPromise,

    /// Export queue reached its capacity.
    #[error("Export queue full")]
    QueueFull,

    /// Export task cancelled by the caller.
    #[error("Export aborted")]
    Aborted,

    /// Export server answered with a non-success status.
    #[error("Export server status: {0:?}")]
    ExportStatus(ExportStatus),

    /// Export server answered for a transaction this client never sent.
    #[error("Unknown export transaction {0}")]
    UnknownTransaction(u32),

    /// Sink rejected a finished file (hash mismatch or write failure).
    #[error("File verification failed for {take}/{file}")]
    HashMismatch { take: String, file: String },
}

impl CpsError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CpsError::Io(_) | CpsError::ConnectionClosed | CpsError::InvalidState(_) => {
                ErrorKind::Transport
            }
            CpsError::Json(_)
            | CpsError::HeaderMismatch
            | CpsError::UnsupportedVersion { .. }
            | CpsError::MalformedMessage(_)
            | CpsError::InvalidMessageType(_)
            | CpsError::Protocol(_)
            | CpsError::MalformedResponse(_)
            | CpsError::UnknownTransaction(_) => ErrorKind::Protocol,
            CpsError::InvalidSession { .. }
            | CpsError::Server { .. }
            | CpsError::ExportStatus(_)
            | CpsError::HashMismatch { .. }
            | CpsError::QueueFull => ErrorKind::Application,
            CpsError::Timeout | CpsError::BrokenPromise => ErrorKind::Timeout,
            CpsError::Aborted => ErrorKind::Aborted,
        }
    }
}

/// Result type alias using CpsError.
pub type Result<T> = std::result::Result<T, CpsError>;
