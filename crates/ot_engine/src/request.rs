//! Requests: operations stamped with their causal origin.

use crate::operation::Operation;
use crate::state_vector::StateVector;
use crate::user::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a request came about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// A fresh edit.
    #[default]
    Do,
    /// The inverse of an earlier request of the same user.
    Undo,
    /// Re-application of an undone request.
    Redo,
}

/// An operation created by `user` when the document was at `origin`.
///
/// Requests are never mutated after creation. Transformation produces new
/// operations; the request log always keeps the request as issued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Author of the request
    pub user: UserId,
    /// State the operation was defined on
    pub origin: StateVector,
    /// The edit itself
    pub operation: Operation,
    #[serde(default)]
    pub kind: RequestKind,
}

impl Request {
    pub fn new(user: UserId, origin: StateVector, operation: Operation) -> Self {
        Self {
            user,
            origin,
            operation,
            kind: RequestKind::Do,
        }
    }

    /// Builder-style setter for the request kind.
    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sequence number of this request within its user's log (1-based).
    pub fn seq(&self) -> u64 {
        self.origin.get(self.user) + 1
    }

    /// The state right after this request was executed at its origin.
    pub fn target(&self) -> StateVector {
        self.origin.with_incremented(self.user)
    }

    /// Whether `other` had been incorporated when this request was created.
    pub fn includes(&self, other: &Request) -> bool {
        self.origin.includes(other.user, other.seq())
    }

    /// Whether neither request knew about the other.
    pub fn is_concurrent_with(&self, other: &Request) -> bool {
        self.user != other.user && !self.includes(other) && !other.includes(self)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} @[{}] {}",
            self.user,
            self.seq(),
            self.origin,
            self.operation
        )
    }
}
