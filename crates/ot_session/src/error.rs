//! Error types for document sessions

use ot_engine::OtError;
use thiserror::Error;

/// Errors returned at the session boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The engine rejected a request without losing consistency
    #[error("Engine error: {0}")]
    Engine(#[from] OtError),

    /// The session hit a fatal condition and must be resynchronized
    #[error("Session corrupted: {0}")]
    Corrupted(String),

    #[error("Session is closed")]
    Closed,

    /// Too many remote requests are waiting for their dependencies
    #[error("Pending request queue is full (max: {0})")]
    QueueFull(usize),

    /// Wire input that could not be decoded into a request
    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
