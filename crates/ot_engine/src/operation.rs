//! Operations and their transformation rules.
//!
//! An [`Operation`] is one atomic edit. Besides applying itself to a
//! [`Buffer`], every operation knows how to be rewritten against a concurrent
//! operation (`transform`) and, when it carries enough context, how to undo
//! itself (`revert`).
//!
//! Operations come in two coordinate systems. A local edit addresses buffer
//! positions. Once it enters the engine it is rewritten onto the slots of the
//! document [`Layout`](crate::layout::Layout), where removed chars keep a
//! hidden slot. Requests, logs and the execution history all hold slot
//! positions; `transform` is only defined on those.
//!
//! # Transformation table
//!
//! | self \ against | NoOp | Insert            | Delete   | Compound     |
//! |----------------|------|-------------------|----------|--------------|
//! | NoOp           | NoOp | NoOp              | NoOp     | NoOp         |
//! | Insert         | self | shift / tie       | self     | fold         |
//! | Delete         | self | shift / split     | self     | fold         |
//! | Compound       | self | element-wise      | element-wise | element-wise |
//!
//! Deleting only hides slots, so nothing ever moves onto the position of
//! something else. Two insertions tie only when they target the same gap, and
//! the explicit [`Precedence`] (lower user id first) orders them.

use crate::buffer::{char_len, Buffer, BufferError, TextBuffer};
use crate::error::{OtError, OtResult};
use crate::user::UserId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Author recorded on the scratch buffer used while capturing compound context.
const SCRATCH_AUTHOR: UserId = UserId(0);

/// Which of two tied insertions ends up first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precedence {
    /// The transformed operation stays in front of the other one.
    Before,
    /// The transformed operation moves behind the other one.
    After,
}

impl Precedence {
    /// The decision as seen from the other operation.
    pub fn flip(self) -> Self {
        match self {
            Precedence::Before => Precedence::After,
            Precedence::After => Precedence::Before,
        }
    }

    /// Lower user id goes first.
    pub fn by_user(own: UserId, other: UserId) -> Self {
        if own < other {
            Precedence::Before
        } else {
            Precedence::After
        }
    }
}

/// An atomic edit of a text buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Does nothing. Produced when two operations cancel out.
    #[default]
    NoOp,

    /// Insert `text` before the char at `position`.
    Insert { position: usize, text: String },

    /// Remove `length` chars at `position`. `text` holds the removed content
    /// once it has been captured, which makes the deletion reversible. On
    /// layout slots the range may cover hidden slots, so `text` can be
    /// shorter than `length`.
    Delete {
        position: usize,
        length: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// A sequence of operations, each expressed against the state left by the
    /// previous ones.
    Compound { operations: Vec<Operation> },
}

impl Operation {
    /// Insertion of `text` at `position`; empty text is a no-op.
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            Operation::NoOp
        } else {
            Operation::Insert { position, text }
        }
    }

    /// Deletion that has not captured its content yet.
    pub fn delete(position: usize, length: usize) -> Self {
        if length == 0 {
            Operation::NoOp
        } else {
            Operation::Delete {
                position,
                length,
                text: None,
            }
        }
    }

    /// Deletion of the known content `text` at `position`.
    pub fn remove(position: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        match char_len(&text) {
            0 => Operation::NoOp,
            length => Operation::Delete {
                position,
                length,
                text: Some(text),
            },
        }
    }

    /// Sequence of operations. Nested sequences are flattened and no-ops
    /// dropped; a single remaining element is returned as is.
    pub fn compound(operations: Vec<Operation>) -> Self {
        fn flatten_into(op: Operation, flat: &mut Vec<Operation>) {
            match op {
                Operation::NoOp => {}
                Operation::Compound { operations } => {
                    for op in operations {
                        flatten_into(op, flat);
                    }
                }
                other => flat.push(other),
            }
        }

        let mut flat = Vec::with_capacity(operations.len());
        for op in operations {
            flatten_into(op, &mut flat);
        }

        match flat.len() {
            0 => Operation::NoOp,
            1 => flat.pop().unwrap_or(Operation::NoOp),
            _ => Operation::Compound { operations: flat },
        }
    }

    /// Check if this is a no-op.
    pub fn is_noop(&self) -> bool {
        matches!(self, Operation::NoOp)
    }

    /// Whether applying the operation changes the buffer at all.
    pub fn affects_buffer(&self) -> bool {
        match self {
            Operation::NoOp => false,
            Operation::Insert { text, .. } => !text.is_empty(),
            Operation::Delete { length, .. } => *length > 0,
            Operation::Compound { operations } => operations.iter().any(Operation::affects_buffer),
        }
    }

    // ========== Transformation ==========

    /// Rewrite this operation so that it applies after `against`.
    ///
    /// Both operations must address slots of the same layout. `precedence`
    /// decides insertion ties; the mirrored call must use `precedence.flip()`.
    pub fn transform(&self, against: &Operation, precedence: Precedence) -> Operation {
        match (self, against) {
            (Operation::NoOp, _) => Operation::NoOp,
            (_, Operation::NoOp) => self.clone(),

            (Operation::Compound { operations }, _) => {
                let mut against = against.clone();
                let mut transformed = Vec::with_capacity(operations.len());
                for op in operations {
                    transformed.push(op.transform(&against, precedence));
                    against = against.transform(op, precedence.flip());
                }
                Operation::compound(transformed)
            }

            (_, Operation::Compound { operations }) => operations
                .iter()
                .fold(self.clone(), |op, other| op.transform(other, precedence)),

            (
                Operation::Insert { position, text },
                Operation::Insert {
                    position: other_position,
                    text: other_text,
                },
            ) => {
                let stays = match position.cmp(other_position) {
                    Ordering::Less => true,
                    Ordering::Greater => false,
                    Ordering::Equal => precedence == Precedence::Before,
                };
                if stays {
                    self.clone()
                } else {
                    Operation::Insert {
                        position: position + char_len(other_text),
                        text: text.clone(),
                    }
                }
            }

            // Removed chars keep their slots.
            (Operation::Insert { .. }, Operation::Delete { .. })
            | (Operation::Delete { .. }, Operation::Delete { .. }) => self.clone(),

            (
                Operation::Delete {
                    position,
                    length,
                    text,
                },
                Operation::Insert {
                    position: inserted_at,
                    text: inserted,
                },
            ) => {
                let inserted_len = char_len(inserted);
                if inserted_at <= position {
                    Operation::Delete {
                        position: position + inserted_len,
                        length: *length,
                        text: text.clone(),
                    }
                } else if *inserted_at >= position + length {
                    self.clone()
                } else {
                    // The insertion lands inside the range: delete around it.
                    // Hidden slots may sit anywhere in the range, so the
                    // captured text cannot be split between the halves.
                    let head = inserted_at - position;
                    Operation::compound(vec![
                        Operation::delete(*position, head),
                        Operation::delete(inserted_at + inserted_len, length - head),
                    ])
                }
            }
        }
    }

    // ========== Application ==========

    /// Verify the operation fits a buffer of `len` chars; returns the length
    /// after application.
    pub fn check_bounds(&self, len: usize) -> Result<usize, BufferError> {
        match self {
            Operation::NoOp => Ok(len),
            Operation::Insert { position, text } => {
                if *position <= len {
                    Ok(len + char_len(text))
                } else {
                    Err(BufferError::OutOfRange {
                        position: *position,
                        length: 0,
                        len,
                    })
                }
            }
            Operation::Delete {
                position, length, ..
            } => match position.checked_add(*length) {
                Some(end) if end <= len => Ok(len - length),
                _ => Err(BufferError::OutOfRange {
                    position: *position,
                    length: *length,
                    len,
                }),
            },
            Operation::Compound { operations } => operations
                .iter()
                .try_fold(len, |len, op| op.check_bounds(len)),
        }
    }

    /// Apply the operation on behalf of `user`.
    ///
    /// Bounds are checked for the whole operation first, so a failing
    /// operation leaves the buffer untouched.
    pub fn apply<B: Buffer + ?Sized>(&self, user: UserId, buffer: &mut B) -> Result<(), BufferError> {
        self.check_bounds(buffer.len())?;
        self.apply_unchecked(user, buffer)
    }

    fn apply_unchecked<B: Buffer + ?Sized>(
        &self,
        user: UserId,
        buffer: &mut B,
    ) -> Result<(), BufferError> {
        match self {
            Operation::NoOp => Ok(()),
            Operation::Insert { position, text } => buffer.insert_text(*position, text, user),
            Operation::Delete {
                position, length, ..
            } => buffer.erase_text(*position, *length, user),
            Operation::Compound { operations } => {
                for op in operations {
                    op.apply_unchecked(user, buffer)?;
                }
                Ok(())
            }
        }
    }

    // ========== Reversibility ==========

    /// Whether `revert` can be computed without further context.
    pub fn is_reversible(&self) -> bool {
        match self {
            Operation::NoOp | Operation::Insert { .. } => true,
            Operation::Delete { text, .. } => text.is_some(),
            Operation::Compound { operations } => operations.iter().all(Operation::is_reversible),
        }
    }

    /// The operation that undoes this one when applied right after it.
    pub fn revert(&self) -> OtResult<Operation> {
        match self {
            Operation::NoOp => Ok(Operation::NoOp),
            Operation::Insert { position, text } => Ok(Operation::remove(*position, text.clone())),
            Operation::Delete {
                position,
                text: Some(text),
                ..
            } => Ok(Operation::insert(*position, text.clone())),
            Operation::Delete { text: None, .. } => Err(OtError::NotReversible),
            Operation::Compound { operations } => operations
                .iter()
                .rev()
                .map(Operation::revert)
                .collect::<OtResult<Vec<_>>>()
                .map(Operation::compound),
        }
    }

    /// Capture the content this operation is about to remove.
    ///
    /// Must run against the buffer *before* the operation is applied.
    pub fn make_reversible<B: Buffer + ?Sized>(&self, buffer: &B) -> Result<Operation, BufferError> {
        if self.is_reversible() {
            return Ok(self.clone());
        }

        match self {
            Operation::Delete {
                position, length, ..
            } => Ok(Operation::Delete {
                position: *position,
                length: *length,
                text: Some(buffer.slice(*position, *length)?),
            }),
            Operation::Compound { operations } => {
                // Later elements read the buffer as left by the earlier ones.
                let mut scratch = TextBuffer::from(buffer.slice(0, buffer.len())?.as_str());
                let mut captured = Vec::with_capacity(operations.len());
                for op in operations {
                    let op = op.make_reversible(&scratch)?;
                    op.apply(SCRATCH_AUTHOR, &mut scratch)?;
                    captured.push(op);
                }
                Ok(Operation::compound(captured))
            }
            _ => Ok(self.clone()),
        }
    }

    /// Structural checks for operations decoded from the wire.
    pub fn validate(&self) -> OtResult<()> {
        match self {
            Operation::Delete {
                length,
                text: Some(text),
                ..
            } if char_len(text) > *length => Err(OtError::Malformed(format!(
                "delete of length {} carries {} chars",
                length,
                char_len(text)
            ))),
            Operation::Compound { operations } => {
                operations.iter().try_for_each(Operation::validate)
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::NoOp => write!(f, "noop"),
            Operation::Insert { position, text } => write!(f, "ins({position}, {text:?})"),
            Operation::Delete {
                position,
                length,
                text: Some(text),
            } => write!(f, "del({position}, {length}, {text:?})"),
            Operation::Delete {
                position, length, ..
            } => write!(f, "del({position}, {length})"),
            Operation::Compound { operations } => {
                write!(f, "[")?;
                for (i, op) in operations.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{op}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    const A: UserId = UserId(1);

    fn applied(text: &str, ops: &[&Operation]) -> String {
        let mut buffer = TextBuffer::from(text);
        for op in ops {
            op.apply(A, &mut buffer).unwrap();
        }
        buffer.text()
    }

    /// Execute slot operations on a fresh layout of `text`.
    fn executed(text: &str, ops: &[&Operation]) -> String {
        let mut buffer = TextBuffer::from(text);
        let mut layout = Layout::new(buffer.len());
        for op in ops {
            layout.execute(op, A, &mut buffer).unwrap();
        }
        buffer.text()
    }

    /// Execute `a` then `b` transformed, and `b` then `a` transformed.
    fn both_orders(text: &str, a: &Operation, b: &Operation, precedence: Precedence) -> (String, String) {
        let b_after_a = b.transform(a, precedence.flip());
        let a_after_b = a.transform(b, precedence);
        (
            executed(text, &[a, &b_after_a]),
            executed(text, &[b, &a_after_b]),
        )
    }

    #[test]
    fn test_constructors_normalize_empty() {
        assert_eq!(Operation::insert(3, ""), Operation::NoOp);
        assert_eq!(Operation::delete(3, 0), Operation::NoOp);
        assert_eq!(Operation::remove(3, ""), Operation::NoOp);
        assert_eq!(Operation::compound(vec![]), Operation::NoOp);
        assert_eq!(
            Operation::compound(vec![Operation::NoOp, Operation::insert(1, "a")]),
            Operation::insert(1, "a")
        );
    }

    #[test]
    fn test_compound_flattens() {
        let nested = Operation::compound(vec![
            Operation::insert(0, "a"),
            Operation::Compound {
                operations: vec![Operation::insert(1, "b"), Operation::insert(2, "c")],
            },
        ]);
        assert_eq!(
            nested,
            Operation::Compound {
                operations: vec![
                    Operation::insert(0, "a"),
                    Operation::insert(1, "b"),
                    Operation::insert(2, "c"),
                ]
            }
        );
    }

    #[test]
    fn test_noop_identity() {
        let insert = Operation::insert(2, "xy");
        let delete = Operation::delete(0, 1);
        assert_eq!(Operation::NoOp.transform(&insert, Precedence::Before), Operation::NoOp);
        assert_eq!(Operation::NoOp.transform(&delete, Precedence::After), Operation::NoOp);
        assert_eq!(insert.transform(&Operation::NoOp, Precedence::After), insert);
        assert_eq!(Operation::NoOp.revert().unwrap(), Operation::NoOp);
        assert!(Operation::NoOp.is_reversible());
        assert!(!Operation::NoOp.affects_buffer());
        assert_eq!(applied("abc", &[&Operation::NoOp]), "abc");
    }

    #[test]
    fn test_insert_insert_tie() {
        let x = Operation::insert(1, "X");
        let y = Operation::insert(1, "Y");

        assert_eq!(x.transform(&y, Precedence::Before), x);
        assert_eq!(x.transform(&y, Precedence::After), Operation::insert(2, "X"));

        let (left, right) = both_orders("ab", &x, &y, Precedence::Before);
        assert_eq!(left, "aXYb");
        assert_eq!(right, "aXYb");
    }

    #[test]
    fn test_insert_insert_shift() {
        let early = Operation::insert(0, "12");
        let late = Operation::insert(3, "Z");
        assert_eq!(late.transform(&early, Precedence::Before), Operation::insert(5, "Z"));
        assert_eq!(early.transform(&late, Precedence::After), early);
    }

    #[test]
    fn test_insert_against_delete_keeps_slot() {
        let delete = Operation::delete(2, 3);
        for position in [1, 2, 4, 5, 6] {
            let insert = Operation::insert(position, "a");
            assert_eq!(insert.transform(&delete, Precedence::Before), insert);
        }
    }

    #[test]
    fn test_insert_inside_delete_survives() {
        // "abcde": user 1 removes "bcd", user 2 types "X" between "b" and "c".
        let delete = Operation::delete(1, 3);
        let insert = Operation::insert(2, "X");

        let (left, right) = both_orders("abcde", &delete, &insert, Precedence::Before);
        assert_eq!(left, "aXe");
        assert_eq!(right, "aXe");
    }

    #[test]
    fn test_distinct_slots_never_tie() {
        // Two insertions that a deletion between them would have collapsed
        // onto one buffer position still keep their slot order.
        let first = Operation::insert(1, "A");
        let second = Operation::insert(2, "B");
        let delete = Operation::delete(0, 3);

        let first = first.transform(&delete, Precedence::After);
        let second = second.transform(&delete, Precedence::Before);
        assert_eq!(second.transform(&first, Precedence::Before), Operation::insert(3, "B"));
        assert_eq!(first.transform(&second, Precedence::After), first);
        assert_eq!(executed("abc", &[&delete, &first, &second.transform(&first, Precedence::Before)]), "AB");
    }

    #[test]
    fn test_delete_insert_conflict_converges() {
        // "abc": user 1 removes "b", user 2 inserts "Z" at 2.
        let delete = Operation::delete(1, 1);
        let insert = Operation::insert(2, "Z");

        assert_eq!(delete.transform(&insert, Precedence::Before), delete);
        assert_eq!(insert.transform(&delete, Precedence::After), insert);

        let (left, right) = both_orders("abc", &delete, &insert, Precedence::Before);
        assert_eq!(left, "aZc");
        assert_eq!(right, "aZc");
    }

    #[test]
    fn test_delete_split_by_insert() {
        let delete = Operation::remove(1, "bcd");
        let insert = Operation::insert(2, "XY");

        let split = delete.transform(&insert, Precedence::Before);
        assert_eq!(
            split,
            Operation::Compound {
                operations: vec![Operation::delete(1, 1), Operation::delete(4, 2)]
            }
        );

        let (left, right) = both_orders("abcde", &delete, &insert, Precedence::After);
        assert_eq!(left, "aXYe");
        assert_eq!(right, "aXYe");
    }

    #[test]
    fn test_delete_shifted_keeps_content() {
        let delete = Operation::remove(2, "cd");
        assert_eq!(
            delete.transform(&Operation::insert(1, "XY"), Precedence::Before),
            Operation::remove(4, "cd")
        );
        assert_eq!(delete.transform(&Operation::insert(4, "Z"), Precedence::Before), delete);
    }

    #[test]
    fn test_delete_delete_overlap() {
        let first = Operation::remove(1, "bcd");
        let second = Operation::remove(2, "cdef");

        assert_eq!(first.transform(&second, Precedence::Before), first);
        assert_eq!(second.transform(&first, Precedence::After), second);

        let (left, right) = both_orders("abcdefg", &first, &second, Precedence::Before);
        assert_eq!(left, "ag");
        assert_eq!(right, "ag");
    }

    #[test]
    fn test_delete_delete_identical() {
        let delete = Operation::delete(1, 2);
        assert_eq!(delete.transform(&delete, Precedence::Before), delete);

        let (left, right) = both_orders("abcd", &delete, &delete, Precedence::Before);
        assert_eq!(left, "ad");
        assert_eq!(right, "ad");
    }

    #[test]
    fn test_compound_transform_converges() {
        let compound = Operation::compound(vec![Operation::insert(0, "X"), Operation::delete(3, 2)]);
        let other = Operation::insert(2, "YY");

        let (left, right) = both_orders("abcdef", &compound, &other, Precedence::After);
        assert_eq!(left, right);
        assert_eq!(left, "XabYYef");
    }

    #[test]
    fn test_revert_round_trip() {
        let ops = [
            Operation::insert(1, "xyz"),
            Operation::remove(0, "ab"),
            Operation::compound(vec![Operation::remove(0, "a"), Operation::insert(2, "Q")]),
        ];
        for op in &ops {
            let undo = op.revert().unwrap();
            assert_eq!(applied("abcd", &[op, &undo]), "abcd", "reverting {op}");
        }
    }

    #[test]
    fn test_revert_requires_captured_content() {
        let delete = Operation::delete(0, 2);
        assert!(!delete.is_reversible());
        assert_eq!(delete.revert(), Err(OtError::NotReversible));
    }

    #[test]
    fn test_make_reversible_before_mutation() {
        let buffer = TextBuffer::from("hello");
        let delete = Operation::delete(1, 3);
        let reversible = delete.make_reversible(&buffer).unwrap();
        assert_eq!(reversible, Operation::remove(1, "ell"));
        assert_eq!(reversible.revert().unwrap(), Operation::insert(1, "ell"));
    }

    #[test]
    fn test_make_reversible_after_mutation_captures_wrong_content() {
        let mut buffer = TextBuffer::from("hello");
        let delete = Operation::delete(1, 3);
        delete.apply(A, &mut buffer).unwrap();

        // Too late: the buffer no longer holds the removed chars.
        assert!(delete.make_reversible(&buffer).is_err());

        let mut longer = TextBuffer::from("hello world");
        delete.apply(A, &mut longer).unwrap();
        let wrong = delete.make_reversible(&longer).unwrap();
        assert_ne!(wrong, Operation::remove(1, "ell"));
    }

    #[test]
    fn test_make_reversible_compound_reads_intermediate_state() {
        let buffer = TextBuffer::from("abcdef");
        let compound = Operation::compound(vec![Operation::delete(0, 2), Operation::delete(1, 2)]);
        let reversible = compound.make_reversible(&buffer).unwrap();
        assert_eq!(
            reversible,
            Operation::compound(vec![Operation::remove(0, "ab"), Operation::remove(1, "de")])
        );
        assert_eq!(applied("abcdef", &[&reversible, &reversible.revert().unwrap()]), "abcdef");
    }

    #[test]
    fn test_apply_is_atomic() {
        let mut buffer = TextBuffer::from("abc");
        let compound = Operation::compound(vec![Operation::delete(0, 1), Operation::delete(5, 1)]);
        assert!(compound.apply(A, &mut buffer).is_err());
        assert_eq!(buffer.text(), "abc");
    }

    #[test]
    fn test_check_bounds() {
        assert_eq!(Operation::insert(3, "xy").check_bounds(3), Ok(5));
        assert!(Operation::insert(4, "xy").check_bounds(3).is_err());
        assert_eq!(Operation::delete(1, 2).check_bounds(3), Ok(1));
        assert!(Operation::delete(usize::MAX, 2).check_bounds(3).is_err());
    }

    #[test]
    fn test_precedence_by_user() {
        assert_eq!(Precedence::by_user(UserId(1), UserId(2)), Precedence::Before);
        assert_eq!(Precedence::by_user(UserId(2), UserId(1)), Precedence::After);
        assert_eq!(Precedence::Before.flip(), Precedence::After);
    }

    #[test]
    fn test_validate() {
        assert!(Operation::remove(0, "ab").validate().is_ok());
        let hidden = Operation::Delete {
            position: 0,
            length: 3,
            text: Some("ab".into()),
        };
        assert!(hidden.validate().is_ok());
        let bad = Operation::Delete {
            position: 0,
            length: 1,
            text: Some("ab".into()),
        };
        assert!(matches!(bad.validate(), Err(OtError::Malformed(_))));
        assert!(Operation::Compound { operations: vec![bad] }.validate().is_err());
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_value(Operation::insert(2, "hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "insert", "position": 2, "text": "hi"}));

        let json = serde_json::to_value(Operation::delete(1, 4)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "delete", "position": 1, "length": 4}));

        let json = serde_json::to_value(Operation::NoOp).unwrap();
        assert_eq!(json, serde_json::json!({"type": "no_op"}));

        let op = Operation::compound(vec![Operation::remove(0, "a"), Operation::insert(3, "b")]);
        let decoded: Operation = serde_json::from_str(&serde_json::to_string(&op).unwrap()).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn test_display() {
        assert_eq!(Operation::insert(1, "a").to_string(), "ins(1, \"a\")");
        assert_eq!(Operation::delete(1, 2).to_string(), "del(1, 2)");
        assert_eq!(
            Operation::compound(vec![Operation::NoOp, Operation::remove(0, "x"), Operation::insert(0, "y")])
                .to_string(),
            "[del(0, 1, \"x\"), ins(0, \"y\")]"
        );
    }
}
