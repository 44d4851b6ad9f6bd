//! User identifiers for collaborative editing.
//!
//! Every participant of a document session is identified by a stable integer
//! id. The id doubles as the final tie-breaker for concurrent insertions at
//! the same position: the lower id is ordered first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a user/site participating in a session.
///
/// User ids are used for:
/// - Indexing the per-user components of a [`StateVector`](crate::StateVector)
/// - Selecting the per-user request log
/// - Breaking ties between concurrent insertions
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// Create a new UserId with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User({})", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<UserId> for u64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_creation() {
        let id = UserId::new(42);
        assert_eq!(id.value(), 42);
    }

    #[test]
    fn test_user_id_ordering() {
        assert!(UserId::new(1) < UserId::new(2));
    }

    #[test]
    fn test_user_id_from_u64() {
        let id: UserId = 42u64.into();
        assert_eq!(id.value(), 42);

        let val: u64 = id.into();
        assert_eq!(val, 42);
    }

    #[test]
    fn test_user_id_display() {
        assert_eq!(UserId::new(7).to_string(), "User(7)");
    }

    #[test]
    fn test_user_id_serializes_as_integer() {
        let json = serde_json::to_string(&UserId::new(3)).unwrap();
        assert_eq!(json, "3");
    }
}
