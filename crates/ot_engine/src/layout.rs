//! Slot layout of a document.
//!
//! Every char ever inserted owns a slot. Deleting a char hides its slot
//! instead of removing it, so slot positions only ever grow and concurrent
//! operations never lose track of where they were made. The buffer holds
//! exactly the visible slots, in order.
//!
//! Local edits arrive in buffer positions and are rewritten onto slots by
//! [`Layout::localize`]. [`Layout::execute`] goes the other way: it applies a
//! slot operation to both the layout and the buffer.

use crate::buffer::{char_len, Buffer, BufferError};
use crate::error::{OtError, OtResult};
use crate::operation::Operation;
use crate::user::UserId;
use serde::{Deserialize, Serialize};

/// A run of adjacent slots sharing visibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Run {
    len: usize,
    visible: bool,
}

/// Visible and hidden slots of a document, run-length encoded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    runs: Vec<Run>,
}

/// Result of executing a slot operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    /// The slot operation with the removed content captured, ready to revert.
    pub operation: Operation,
    /// The same edit in buffer positions.
    pub visible: Operation,
}

impl Layout {
    /// Layout of a document holding `visible` chars and no hidden slots.
    pub fn new(visible: usize) -> Self {
        let mut layout = Self::default();
        layout.runs.push(Run {
            len: visible,
            visible: true,
        });
        layout.normalize();
        layout
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.runs.iter().map(|run| run.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of visible slots; equals the buffer length.
    pub fn visible_len(&self) -> usize {
        self.runs
            .iter()
            .filter(|run| run.visible)
            .map(|run| run.len)
            .sum()
    }

    /// Number of hidden slots.
    pub fn hidden_len(&self) -> usize {
        self.len() - self.visible_len()
    }

    // ========== Coordinates ==========

    /// Visible slots in front of slot `position`.
    fn visible_before(&self, position: usize) -> usize {
        let mut remaining = position;
        let mut visible = 0;
        for run in &self.runs {
            if remaining == 0 {
                break;
            }
            let take = run.len.min(remaining);
            if run.visible {
                visible += take;
            }
            remaining -= take;
        }
        visible
    }

    /// Slot of the `index`-th visible char.
    fn visible_slot(&self, index: usize) -> Option<usize> {
        let mut start = 0;
        let mut remaining = index;
        for run in &self.runs {
            if run.visible {
                if remaining < run.len {
                    return Some(start + remaining);
                }
                remaining -= run.len;
            }
            start += run.len;
        }
        None
    }

    /// Slot gap for text typed at buffer `position`: right behind the
    /// visible char in front of it, ahead of any hidden slots.
    fn insertion_point(&self, position: usize) -> Option<usize> {
        match position {
            0 => Some(0),
            _ => self.visible_slot(position - 1).map(|slot| slot + 1),
        }
    }

    /// Rewrite an operation on buffer positions onto slots.
    ///
    /// Elements of a compound are rewritten against the layout left by the
    /// earlier ones. Deletions keep whatever content they already captured.
    pub fn localize(&self, operation: &Operation) -> Result<Operation, BufferError> {
        operation.check_bounds(self.visible_len())?;
        self.localize_checked(operation)
    }

    fn localize_checked(&self, operation: &Operation) -> Result<Operation, BufferError> {
        let out_of_range = |position: usize, length: usize| BufferError::OutOfRange {
            position,
            length,
            len: self.visible_len(),
        };

        match operation {
            Operation::NoOp => Ok(Operation::NoOp),
            Operation::Insert { position, text } => {
                let slot = self
                    .insertion_point(*position)
                    .ok_or_else(|| out_of_range(*position, 0))?;
                Ok(Operation::insert(slot, text.clone()))
            }
            Operation::Delete { length: 0, .. } => Ok(Operation::NoOp),
            Operation::Delete {
                position,
                length,
                text,
            } => {
                let first = self.visible_slot(*position);
                let last = self.visible_slot(position + length - 1);
                match (first, last) {
                    (Some(first), Some(last)) => Ok(Operation::Delete {
                        position: first,
                        length: last + 1 - first,
                        text: text.clone(),
                    }),
                    _ => Err(out_of_range(*position, *length)),
                }
            }
            Operation::Compound { operations } => {
                let mut scratch = self.clone();
                let mut localized = Vec::with_capacity(operations.len());
                for op in operations {
                    let op = scratch.localize_checked(op)?;
                    scratch.record(&op);
                    localized.push(op);
                }
                Ok(Operation::compound(localized))
            }
        }
    }

    /// Verify a slot operation fits this layout.
    pub fn check_bounds(&self, operation: &Operation) -> Result<(), BufferError> {
        fits(operation, self.len()).map(|_| ())
    }

    // ========== Execution ==========

    /// Apply a slot operation to the layout and to `buffer`.
    ///
    /// Removed content is read from the buffer, whatever the operation
    /// carried. An operation that does not fit the layout is rejected before
    /// anything changes. A buffer that disagrees with the layout is an
    /// invariant violation.
    pub fn execute<B: Buffer + ?Sized>(
        &mut self,
        operation: &Operation,
        user: UserId,
        buffer: &mut B,
    ) -> OtResult<Applied> {
        self.check_buffer(buffer)?;
        self.check_bounds(operation)?;
        self.execute_checked(operation, user, buffer)
            .map_err(|err| OtError::Invariant(format!("buffer rejected {}: {}", operation, err)))
    }

    /// The buffer must hold exactly the visible slots.
    pub fn check_buffer<B: Buffer + ?Sized>(&self, buffer: &B) -> OtResult<()> {
        if buffer.len() == self.visible_len() {
            Ok(())
        } else {
            Err(OtError::Invariant(format!(
                "buffer holds {} chars but the layout has {} visible slots",
                buffer.len(),
                self.visible_len()
            )))
        }
    }

    fn execute_checked<B: Buffer + ?Sized>(
        &mut self,
        operation: &Operation,
        user: UserId,
        buffer: &mut B,
    ) -> Result<Applied, BufferError> {
        match operation {
            Operation::NoOp => Ok(Applied {
                operation: Operation::NoOp,
                visible: Operation::NoOp,
            }),
            Operation::Insert { position, text } => {
                let at = self.visible_before(*position);
                buffer.insert_text(at, text, user)?;
                self.insert_slots(*position, char_len(text));
                Ok(Applied {
                    operation: operation.clone(),
                    visible: Operation::insert(at, text.clone()),
                })
            }
            Operation::Delete {
                position, length, ..
            } => {
                let at = self.visible_before(*position);
                let count = self.visible_before(position + length) - at;
                let removed = buffer.slice(at, count)?;
                if count > 0 {
                    buffer.erase_text(at, count, user)?;
                }
                self.hide(*position, *length);
                Ok(Applied {
                    operation: Operation::Delete {
                        position: *position,
                        length: *length,
                        text: Some(removed.clone()),
                    },
                    visible: Operation::remove(at, removed),
                })
            }
            Operation::Compound { operations } => {
                let mut recorded = Vec::with_capacity(operations.len());
                let mut visible = Vec::with_capacity(operations.len());
                for op in operations {
                    let applied = self.execute_checked(op, user, buffer)?;
                    recorded.push(applied.operation);
                    visible.push(applied.visible);
                }
                Ok(Applied {
                    operation: Operation::compound(recorded),
                    visible: Operation::compound(visible),
                })
            }
        }
    }

    /// Update slots only.
    fn record(&mut self, operation: &Operation) {
        match operation {
            Operation::NoOp => {}
            Operation::Insert { position, text } => self.insert_slots(*position, char_len(text)),
            Operation::Delete {
                position, length, ..
            } => self.hide(*position, *length),
            Operation::Compound { operations } => {
                for op in operations {
                    self.record(op);
                }
            }
        }
    }

    // ========== Runs ==========

    /// Split runs so one starts at `position`; returns its index.
    fn split_at(&mut self, position: usize) -> usize {
        let mut start = 0;
        for index in 0..self.runs.len() {
            if start == position {
                return index;
            }
            let run = self.runs[index];
            if position < start + run.len {
                let head = position - start;
                self.runs[index].len = head;
                self.runs.insert(
                    index + 1,
                    Run {
                        len: run.len - head,
                        visible: run.visible,
                    },
                );
                return index + 1;
            }
            start += run.len;
        }
        self.runs.len()
    }

    fn insert_slots(&mut self, position: usize, count: usize) {
        if count == 0 {
            return;
        }
        let index = self.split_at(position);
        self.runs.insert(
            index,
            Run {
                len: count,
                visible: true,
            },
        );
        self.normalize();
    }

    fn hide(&mut self, position: usize, count: usize) {
        if count == 0 {
            return;
        }
        let first = self.split_at(position);
        let end = self.split_at(position + count);
        for run in &mut self.runs[first..end] {
            run.visible = false;
        }
        self.normalize();
    }

    /// Drop empty runs and merge neighbours of equal visibility.
    fn normalize(&mut self) {
        let mut merged: Vec<Run> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if run.len == 0 {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.visible == run.visible => last.len += run.len,
                _ => merged.push(run),
            }
        }
        self.runs = merged;
    }
}

/// Slot count after `operation`, if it fits `len` slots.
fn fits(operation: &Operation, len: usize) -> Result<usize, BufferError> {
    match operation {
        Operation::NoOp => Ok(len),
        Operation::Insert { position, text } if *position <= len => Ok(len + char_len(text)),
        Operation::Insert { position, .. } => Err(BufferError::OutOfRange {
            position: *position,
            length: 0,
            len,
        }),
        Operation::Delete {
            position, length, ..
        } => match position.checked_add(*length) {
            Some(end) if end <= len => Ok(len),
            _ => Err(BufferError::OutOfRange {
                position: *position,
                length: *length,
                len,
            }),
        },
        Operation::Compound { operations } => {
            operations.iter().try_fold(len, |len, op| fits(op, len))
        }
    }
}
