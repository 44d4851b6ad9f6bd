//! Local execution history.
//!
//! Records every operation in the form it was actually applied to the local
//! buffer, in application order. Undo uses it to move the inverse of an old
//! operation forward to the current state.

use crate::operation::Operation;
use crate::user::UserId;
use std::collections::VecDeque;

/// One operation as executed on the local buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Executed {
    pub user: UserId,
    /// Sequence number of the request within its user's log
    pub seq: u64,
    pub operation: Operation,
}

/// Application-ordered record of executed operations.
///
/// Entries are addressed by a monotonically increasing index that stays valid
/// after older entries have been trimmed.
#[derive(Clone, Debug, Default)]
pub struct ExecutionHistory {
    /// Index of the front entry
    first: u64,
    entries: VecDeque<Executed>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an executed operation and return its index.
    pub fn push(&mut self, user: UserId, seq: u64, operation: Operation) -> u64 {
        self.entries.push_back(Executed {
            user,
            seq,
            operation,
        });
        self.next_index() - 1
    }

    /// Index the next pushed entry will get.
    pub fn next_index(&self) -> u64 {
        self.first + self.entries.len() as u64
    }

    pub fn get(&self, index: u64) -> Option<&Executed> {
        let offset = index.checked_sub(self.first)?;
        self.entries.get(offset as usize)
    }

    /// Entries executed after `index`, in application order.
    pub fn after(&self, index: u64) -> impl Iterator<Item = &Executed> {
        let skip = (index + 1).saturating_sub(self.first) as usize;
        self.entries.iter().skip(skip)
    }

    /// Drop every entry older than `index`.
    pub fn trim_before(&mut self, index: u64) {
        while self.first < index && self.entries.pop_front().is_some() {
            self.first += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
