//! The document buffer the engine edits.
//!
//! The engine never owns the document storage; it only needs the apply-points
//! below. Positions and lengths count Unicode scalar values (chars), not bytes.

use crate::user::UserId;
use thiserror::Error;

/// Errors raised by a buffer when an edit does not fit its content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The addressed range lies outside the buffer.
    #[error("Range of {length} chars at {position} is out of bounds for buffer of length {len}")]
    OutOfRange {
        position: usize,
        length: usize,
        len: usize,
    },
}

/// Apply-points of a text document.
pub trait Buffer {
    /// Number of chars in the buffer.
    fn len(&self) -> usize;

    /// Check if the buffer is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `length` chars starting at `position`.
    fn slice(&self, position: usize, length: usize) -> Result<String, BufferError>;

    /// Insert `text` before the char at `position`.
    fn insert_text(&mut self, position: usize, text: &str, author: UserId)
        -> Result<(), BufferError>;

    /// Remove `length` chars starting at `position`.
    fn erase_text(&mut self, position: usize, length: usize, author: UserId)
        -> Result<(), BufferError>;
}

/// A plain in-memory text buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextBuffer {
    chars: Vec<char>,
}

impl TextBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { chars: Vec::new() }
    }

    /// The full buffer content.
    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    fn check_range(&self, position: usize, length: usize) -> Result<(), BufferError> {
        match position.checked_add(length) {
            Some(end) if end <= self.chars.len() => Ok(()),
            _ => Err(BufferError::OutOfRange {
                position,
                length,
                len: self.chars.len(),
            }),
        }
    }
}

impl From<&str> for TextBuffer {
    fn from(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
        }
    }
}

impl Buffer for TextBuffer {
    fn len(&self) -> usize {
        self.chars.len()
    }

    fn slice(&self, position: usize, length: usize) -> Result<String, BufferError> {
        self.check_range(position, length)?;
        Ok(self.chars[position..position + length].iter().collect())
    }

    fn insert_text(
        &mut self,
        position: usize,
        text: &str,
        _author: UserId,
    ) -> Result<(), BufferError> {
        self.check_range(position, 0)?;
        self.chars.splice(position..position, text.chars());
        Ok(())
    }

    fn erase_text(
        &mut self,
        position: usize,
        length: usize,
        _author: UserId,
    ) -> Result<(), BufferError> {
        self.check_range(position, length)?;
        self.chars.drain(position..position + length);
        Ok(())
    }
}

/// Number of chars in `text`.
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}
