//! Session boundary for the operational transformation engine.
//!
//! A transport hands remote requests to a [`DocumentSession`] and forwards
//! the [`SessionEvent::Outgoing`] requests it publishes to every peer. The
//! session holds back requests that arrive before their dependencies and
//! reports fatal engine conditions once, so the owner can resynchronize.
//!
//! # Modules
//!
//! - `config`: Session configuration and loading
//! - `session`: The per-document session
//! - `event`: Events published to subscribers
//! - `replay`: Scripted multi-site replays
//! - `error`: Error types for sessions

pub mod config;
pub mod error;
pub mod event;
pub mod replay;
pub mod session;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use event::SessionEvent;
pub use replay::{ReplayReport, Scenario, SiteOutcome, SiteScript, Step};
pub use session::{DocumentSession, SessionStats, SessionStatus};
