//! Per-user undo and redo stacks.
//!
//! The stacks only hold indices into the [`ExecutionHistory`](crate::history::ExecutionHistory);
//! the operations themselves stay in the history so they can be moved forward
//! across everything that happened after them.

use crate::user::UserId;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Debug, Default)]
struct Stacks {
    undo: VecDeque<u64>,
    redo: Vec<u64>,
}

/// Undo/redo stacks of every local user.
#[derive(Clone, Debug)]
pub struct UndoStacks {
    /// Maximum number of undo entries per user
    max_steps: usize,
    users: HashMap<UserId, Stacks>,
}

impl UndoStacks {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps,
            users: HashMap::new(),
        }
    }

    /// Record a fresh edit. Clears the user's redo stack.
    pub fn record(&mut self, user: UserId, index: u64) {
        let stacks = self.users.entry(user).or_default();
        stacks.redo.clear();
        Self::push_bounded(&mut stacks.undo, index, self.max_steps);
    }

    /// Record a redone edit; the remaining redo entries stay available.
    pub fn record_redone(&mut self, user: UserId, index: u64) {
        let stacks = self.users.entry(user).or_default();
        Self::push_bounded(&mut stacks.undo, index, self.max_steps);
    }

    /// Record the execution of an undo so it can be redone.
    pub fn record_undone(&mut self, user: UserId, index: u64) {
        self.users.entry(user).or_default().redo.push(index);
    }

    fn push_bounded(undo: &mut VecDeque<u64>, index: u64, max_steps: usize) {
        undo.push_back(index);
        while undo.len() > max_steps {
            undo.pop_front();
        }
    }

    pub fn pop_undo(&mut self, user: UserId) -> Option<u64> {
        self.users.get_mut(&user)?.undo.pop_back()
    }

    pub fn pop_redo(&mut self, user: UserId) -> Option<u64> {
        self.users.get_mut(&user)?.redo.pop()
    }

    /// Put an entry back after a failed undo.
    pub fn restore_undo(&mut self, user: UserId, index: u64) {
        self.users.entry(user).or_default().undo.push_back(index);
    }

    /// Put an entry back after a failed redo.
    pub fn restore_redo(&mut self, user: UserId, index: u64) {
        self.users.entry(user).or_default().redo.push(index);
    }

    pub fn has_undo(&self, user: UserId) -> bool {
        self.users.get(&user).is_some_and(|s| !s.undo.is_empty())
    }

    pub fn has_redo(&self, user: UserId) -> bool {
        self.users.get(&user).is_some_and(|s| !s.redo.is_empty())
    }

    /// Oldest history index any stack still refers to.
    pub fn oldest_referenced(&self) -> Option<u64> {
        self.users
            .values()
            .flat_map(|s| s.undo.iter().chain(s.redo.iter()))
            .copied()
            .min()
    }

    /// Drop the stacks of a user leaving the session.
    pub fn remove_user(&mut self, user: UserId) {
        self.users.remove(&user);
    }

    /// Clear all undo/redo history
    pub fn clear(&mut self) {
        self.users.clear();
    }
}

impl Default for UndoStacks {
    fn default() -> Self {
        Self::new(100)
    }
}
