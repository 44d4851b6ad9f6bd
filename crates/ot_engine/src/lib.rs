//! Operational transformation for real-time collaborative text editing.
//!
//! This crate implements the concurrency control that lets several sites edit
//! the same text at once and still converge to identical content, whatever
//! order their edits arrive in, with per-user undo that stays meaningful in
//! the presence of concurrent edits.
//!
//! # Modules
//!
//! - `user`: Stable user identifiers
//! - `state_vector`: Vector clocks describing document states
//! - `operation`: Edits and their transformation rules
//! - `buffer`: The document interface the engine edits through
//! - `layout`: Slot layout mapping buffer positions onto stable slots
//! - `request`: Operations stamped with their causal origin
//! - `request_log`: Per-user request history with retention
//! - `history`: Local execution history used by undo
//! - `undo`: Per-user undo/redo stacks
//! - `algorithm`: The engine tying everything together
//! - `wire`: Wire envelope for requests
//! - `error`: Error types for the engine
//!
//! # Example
//!
//! ```
//! use ot_engine::{Algorithm, Operation, StateVector, TextBuffer, UserId};
//!
//! let alice = UserId::new(1);
//! let bob = UserId::new(2);
//!
//! let mut site_a = Algorithm::default();
//! let mut site_b = Algorithm::default();
//! site_a.add_user(bob, StateVector::new());
//! site_b.add_user(alice, StateVector::new());
//!
//! let mut text_a = TextBuffer::from("ab");
//! let mut text_b = TextBuffer::from("ab");
//!
//! // Both users type at the same spot at the same time.
//! let from_a = site_a.process_local(&mut text_a, alice, Operation::insert(1, "X")).unwrap();
//! let from_b = site_b.process_local(&mut text_b, bob, Operation::insert(1, "Y")).unwrap();
//!
//! site_a.process_remote(&mut text_a, from_b).unwrap();
//! site_b.process_remote(&mut text_b, from_a).unwrap();
//!
//! assert_eq!(text_a.text(), "aXYb");
//! assert_eq!(text_b.text(), "aXYb");
//! ```

pub mod algorithm;
pub mod buffer;
pub mod error;
pub mod history;
pub mod layout;
pub mod operation;
pub mod request;
pub mod request_log;
pub mod state_vector;
pub mod undo;
pub mod user;
pub mod wire;

// Re-export commonly used types
pub use algorithm::{Algorithm, AlgorithmConfig, RetentionPolicy};
pub use buffer::{Buffer, BufferError, TextBuffer};
pub use error::{OtError, OtResult};
pub use layout::{Applied, Layout};
pub use operation::{Operation, Precedence};
pub use request::{Request, RequestKind};
pub use request_log::{RequestLog, RequestLogs};
pub use state_vector::{Causality, ParseVectorError, StateVector};
pub use user::UserId;
pub use wire::{WireRequest, WIRE_VERSION};
