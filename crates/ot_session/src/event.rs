//! Events published by a document session.

use ot_engine::{Operation, Request, UserId};

/// Something the transport or UI layer should react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A local, undo or redo request that must be broadcast to every peer
    Outgoing(Request),
    /// A remote request was incorporated into the buffer
    Applied {
        user: UserId,
        seq: u64,
        /// The operation as it was executed locally
        operation: Operation,
    },
    /// The session hit a fatal condition; emitted once
    Corrupted { reason: String },
    Closed,
}

impl SessionEvent {
    /// Whether no further events will follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Corrupted { .. } | SessionEvent::Closed)
    }
}
