//! State vectors for tracking causal history.
//!
//! A state vector maps every user to the number of that user's requests that
//! have been incorporated into a document state. Users that are not listed
//! implicitly map to zero; zero components are never stored, so two vectors
//! describing the same state always compare (and hash) equal.
//!
//! Vectors are partially ordered component-wise. Two vectors where neither is
//! below the other describe causally concurrent states.

use crate::user::UserId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result of comparing two state vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Causality {
    /// Every component is less or equal, at least one strictly less.
    Less,
    /// Every component is greater or equal, at least one strictly greater.
    Greater,
    /// All components are equal.
    Equal,
    /// Neither vector is below the other.
    Concurrent,
}

/// Error returned when parsing the textual form of a state vector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseVectorError {
    #[error("Invalid component '{0}', expected 'user:count'")]
    InvalidComponent(String),

    #[error("Invalid number in '{0}'")]
    InvalidNumber(String),

    #[error("Duplicate user {0}")]
    DuplicateUser(u64),
}

/// Vector clock over users.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateVector {
    /// Map from user to the number of incorporated requests (never zero)
    components: BTreeMap<UserId, u64>,
}

impl StateVector {
    /// Create a new empty vector.
    pub fn new() -> Self {
        Self {
            components: BTreeMap::new(),
        }
    }

    /// Get the component for a user (0 if absent).
    pub fn get(&self, user: UserId) -> u64 {
        self.components.get(&user).copied().unwrap_or(0)
    }

    /// Set the component for a user.
    pub fn set(&mut self, user: UserId, count: u64) {
        if count == 0 {
            self.components.remove(&user);
        } else {
            self.components.insert(user, count);
        }
    }

    /// Increment and return the component for a user.
    pub fn increment(&mut self, user: UserId) -> u64 {
        let count = self.get(user) + 1;
        self.set(user, count);
        count
    }

    /// Copy of this vector with one component incremented.
    pub fn with_incremented(&self, user: UserId) -> Self {
        let mut vector = self.clone();
        vector.increment(user);
        vector
    }

    /// Copy of this vector with one component decremented (saturating).
    pub fn with_decremented(&self, user: UserId) -> Self {
        let mut vector = self.clone();
        vector.set(user, self.get(user).saturating_sub(1));
        vector
    }

    /// Whether the `seq`-th request of `user` is incorporated.
    pub fn includes(&self, user: UserId, seq: u64) -> bool {
        self.get(user) >= seq
    }

    /// Check if every component is less than or equal to the other's.
    pub fn le(&self, other: &StateVector) -> bool {
        self.components
            .iter()
            .all(|(&user, &count)| count <= other.get(user))
    }

    /// Compare two vectors under the component-wise partial order.
    pub fn compare(&self, other: &StateVector) -> Causality {
        match (self.le(other), other.le(self)) {
            (true, true) => Causality::Equal,
            (true, false) => Causality::Less,
            (false, true) => Causality::Greater,
            (false, false) => Causality::Concurrent,
        }
    }

    /// Check if the two vectors are causally concurrent.
    pub fn is_concurrent_with(&self, other: &StateVector) -> bool {
        self.compare(other) == Causality::Concurrent
    }

    /// True iff every dependency of `origin` is already reflected in `current`.
    pub fn causally_ready(origin: &StateVector, current: &StateVector) -> bool {
        origin.le(current)
    }

    /// Component-wise maximum (least common successor).
    pub fn join(&self, other: &StateVector) -> StateVector {
        let mut joined = self.clone();
        for (&user, &count) in &other.components {
            if count > joined.get(user) {
                joined.set(user, count);
            }
        }
        joined
    }

    /// Component-wise minimum.
    pub fn meet(&self, other: &StateVector) -> StateVector {
        let mut met = StateVector::new();
        for (&user, &count) in &self.components {
            met.set(user, count.min(other.get(user)));
        }
        met
    }

    /// Number of requests in `other` that are not in `self`, assuming `self <= other`.
    pub fn vdiff(&self, other: &StateVector) -> u64 {
        other
            .components
            .iter()
            .map(|(&user, &count)| count.saturating_sub(self.get(user)))
            .sum()
    }

    /// Iterate over the non-zero components in ascending user order.
    pub fn iter(&self) -> impl Iterator<Item = (UserId, u64)> + '_ {
        self.components.iter().map(|(&user, &count)| (user, count))
    }

    /// Users with a non-zero component, ascending.
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.components.keys().copied()
    }

    /// Check if the vector is all zeros.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns the number of non-zero components.
    pub fn len(&self) -> usize {
        self.components.len()
    }
}

impl PartialOrd for StateVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.compare(other) {
            Causality::Less => Some(Ordering::Less),
            Causality::Greater => Some(Ordering::Greater),
            Causality::Equal => Some(Ordering::Equal),
            Causality::Concurrent => None,
        }
    }
}

impl FromIterator<(UserId, u64)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (UserId, u64)>>(iter: I) -> Self {
        let mut vector = StateVector::new();
        for (user, count) in iter {
            vector.set(user, count);
        }
        vector
    }
}

impl fmt::Display for StateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (user, count) in self.iter() {
            if !first {
                f.write_str(";")?;
            }
            write!(f, "{}:{}", user.0, count)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for StateVector {
    type Err = ParseVectorError;

    /// Parse the compact `"1:5;2:3"` form. The empty string is the zero vector.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut vector = StateVector::new();
        let mut seen = std::collections::BTreeSet::new();

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (user, count) = part
                .split_once(':')
                .ok_or_else(|| ParseVectorError::InvalidComponent(part.to_string()))?;
            let user: u64 = user
                .trim()
                .parse()
                .map_err(|_| ParseVectorError::InvalidNumber(part.to_string()))?;
            let count: u64 = count
                .trim()
                .parse()
                .map_err(|_| ParseVectorError::InvalidNumber(part.to_string()))?;
            if !seen.insert(user) {
                return Err(ParseVectorError::DuplicateUser(user));
            }
            vector.set(UserId(user), count);
        }

        Ok(vector)
    }
}
