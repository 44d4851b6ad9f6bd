//! Error types for the transformation engine.

use crate::buffer::BufferError;
use crate::state_vector::StateVector;
use crate::user::UserId;
use thiserror::Error;

/// Result type alias for engine operations.
pub type OtResult<T> = Result<T, OtError>;

/// Errors that can occur while processing requests.
///
/// The variants fall into three groups: recoverable conditions that the
/// transport handles by requeueing or dropping the request, rejections of
/// malformed input that leave the engine untouched, and fatal conditions that
/// corrupt the session (see [`OtError::is_fatal`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// The request depends on requests that have not been processed yet.
    #[error("Request {seq} from {user} is not causally ready: origin {origin}, current {current}")]
    NotReady {
        user: UserId,
        seq: u64,
        origin: StateVector,
        current: StateVector,
    },

    /// The request has been processed before (at-least-once delivery).
    #[error("Request {seq} from {user} was already processed")]
    AlreadyProcessed { user: UserId, seq: u64 },

    /// A log entry required to transform a request has been evicted.
    #[error("History truncated: request {seq} of {user} is no longer retained")]
    HistoryTruncated { user: UserId, seq: u64 },

    /// A request was appended out of sequence.
    #[error("Invalid sequence number for {user}: expected {expected}, got {actual}")]
    SequenceGap {
        user: UserId,
        expected: u64,
        actual: u64,
    },

    /// A user's state vector went backwards.
    #[error("Non-monotonic state vector from {user}: known {known}, received {received}")]
    NonMonotonic {
        user: UserId,
        known: StateVector,
        received: StateVector,
    },

    /// Revert was requested for an operation that has not captured its context.
    #[error("Operation is not reversible")]
    NotReversible,

    /// The buffer rejected the operation.
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// The request is structurally invalid or cannot apply to the document.
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// An internal invariant does not hold.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// A previous fatal error corrupted the session.
    #[error("Session corrupted, resynchronize: {0}")]
    SessionCorrupted(String),
}

impl OtError {
    /// Whether the session must be torn down and resynchronized.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OtError::HistoryTruncated { .. }
                | OtError::SequenceGap { .. }
                | OtError::NonMonotonic { .. }
                | OtError::Invariant(_)
                | OtError::SessionCorrupted(_)
        )
    }

    /// Whether the transport should simply retry or drop the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OtError::NotReady { .. } | OtError::AlreadyProcessed { .. }
        )
    }
}
