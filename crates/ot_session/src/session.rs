//! Document session management.
//!
//! A [`DocumentSession`] is the single owner of one document replica: the
//! engine, the buffer it edits, and the remote requests that arrived before
//! their dependencies. Every mutation goes through `&mut self`, so requests
//! for one document are processed strictly one at a time.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::event::SessionEvent;
use chrono::{DateTime, Utc};
use ot_engine::{
    Algorithm, Buffer, Layout, Operation, OtError, Request, StateVector, UserId, WireRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

/// Status of a document session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting local and remote edits.
    Active,
    /// A fatal error occurred; the replica must be resynchronized.
    Corrupted,
    /// Closed by its owner.
    Closed,
}

/// Statistics about a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStats {
    pub status: SessionStatus,
    /// Requests generated at this site, including undo and redo.
    pub local_requests: u64,
    /// Remote requests incorporated.
    pub remote_requests: u64,
    /// Remote requests waiting for their dependencies.
    pub pending_requests: usize,
    /// State vector of the document.
    pub current: StateVector,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Outcome of handing one remote request to the engine.
enum Incorporated {
    Applied,
    NotReady(Request),
    Duplicate,
}

/// One replica of a collaboratively edited document.
#[derive(Debug)]
pub struct DocumentSession<B: Buffer> {
    config: SessionConfig,
    algorithm: Algorithm,
    buffer: B,
    /// Remote requests that were not causally ready, oldest first.
    pending: VecDeque<Request>,
    events: broadcast::Sender<SessionEvent>,
    status: SessionStatus,
    corruption: Option<String>,
    local_requests: u64,
    remote_requests: u64,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl<B: Buffer> DocumentSession<B> {
    /// Start a session on a fresh document.
    pub fn new(buffer: B, config: SessionConfig) -> Self {
        let algorithm = Algorithm::new(config.engine.clone());
        Self::start(buffer, config, algorithm)
    }

    /// Start a session from a snapshot: a buffer that already reflects
    /// `initial`, together with the slot layout exported at that state.
    pub fn with_state(
        buffer: B,
        config: SessionConfig,
        initial: StateVector,
        layout: Layout,
    ) -> Self {
        let algorithm = Algorithm::with_state(config.engine.clone(), initial, layout);
        Self::start(buffer, config, algorithm)
    }

    fn start(buffer: B, config: SessionConfig, algorithm: Algorithm) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let now = Utc::now();

        tracing::info!("Document session started at [{}]", algorithm.current());

        Self {
            config,
            algorithm,
            buffer,
            pending: VecDeque::new(),
            events,
            status: SessionStatus::Active,
            corruption: None,
            local_requests: 0,
            remote_requests: 0,
            created_at: now,
            last_activity: now,
        }
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Take the buffer out of the session.
    pub fn into_buffer(self) -> B {
        self.buffer
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    /// State vector of the document.
    pub fn current(&self) -> &StateVector {
        self.algorithm.current()
    }

    /// Number of remote requests waiting for their dependencies.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_undo(&self, user: UserId) -> bool {
        self.algorithm.has_undo(user)
    }

    pub fn has_redo(&self, user: UserId) -> bool {
        self.algorithm.has_redo(user)
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            status: self.status,
            local_requests: self.local_requests,
            remote_requests: self.remote_requests,
            pending_requests: self.pending.len(),
            current: self.algorithm.current().clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    // ========== Participants ==========

    /// Register a peer that has reached `vector`.
    pub fn add_user(&mut self, user: UserId, vector: StateVector) -> SessionResult<()> {
        self.ensure_active()?;
        self.algorithm.add_user(user, vector);
        Ok(())
    }

    /// Forget a peer that left.
    pub fn remove_user(&mut self, user: UserId) -> SessionResult<()> {
        self.ensure_active()?;
        self.algorithm.remove_user(user);
        Ok(())
    }

    // ========== Editing ==========

    /// Apply an edit made at this site and publish the resulting request.
    pub fn local_edit(&mut self, user: UserId, operation: Operation) -> SessionResult<Request> {
        self.ensure_active()?;
        let result = self.algorithm.process_local(&mut self.buffer, user, operation);
        let request = result.map_err(|err| self.reject(err))?;
        self.publish_local(request.clone());
        Ok(request)
    }

    /// Undo the last edit of `user`, publishing the request if there was one.
    pub fn undo(&mut self, user: UserId) -> SessionResult<Option<Request>> {
        self.ensure_active()?;
        let result = self.algorithm.undo(&mut self.buffer, user);
        let request = result.map_err(|err| self.reject(err))?;
        if let Some(request) = &request {
            self.publish_local(request.clone());
        }
        Ok(request)
    }

    /// Redo the last undone edit of `user`, publishing the request if there was one.
    pub fn redo(&mut self, user: UserId) -> SessionResult<Option<Request>> {
        self.ensure_active()?;
        let result = self.algorithm.redo(&mut self.buffer, user);
        let request = result.map_err(|err| self.reject(err))?;
        if let Some(request) = &request {
            self.publish_local(request.clone());
        }
        Ok(request)
    }

    /// Hand a remote request to the engine.
    ///
    /// A request that is not yet causally ready is queued and retried after
    /// every later successful incorporation. Duplicates are ignored. Returns
    /// how many requests were incorporated, counting queued ones that became
    /// ready.
    pub fn receive(&mut self, request: Request) -> SessionResult<usize> {
        self.ensure_active()?;

        match self.incorporate(request)? {
            Incorporated::Applied => Ok(1 + self.drain_pending()?),
            Incorporated::NotReady(request) => {
                self.enqueue(request)?;
                Ok(0)
            }
            Incorporated::Duplicate => Ok(0),
        }
    }

    /// Decode a request in wire format and receive it.
    ///
    /// Undecodable input is rejected before it reaches the engine.
    pub fn receive_wire(&mut self, data: &[u8]) -> SessionResult<usize> {
        self.ensure_active()?;
        let request = WireRequest::decode(data).map_err(|err| {
            tracing::warn!("Dropping undecodable request: {}", err);
            SessionError::Malformed(err.to_string())
        })?;
        self.receive(request)
    }

    /// Close the session. Later calls are rejected.
    pub fn close(&mut self) {
        if self.status == SessionStatus::Closed {
            return;
        }
        tracing::info!(
            "Closing document session at [{}] with {} pending requests",
            self.algorithm.current(),
            self.pending.len()
        );
        self.status = SessionStatus::Closed;
        self.pending.clear();
        self.emit(SessionEvent::Closed);
    }

    // ========== Internals ==========

    fn ensure_active(&self) -> SessionResult<()> {
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Corrupted => Err(SessionError::Corrupted(
                self.corruption.clone().unwrap_or_default(),
            )),
            SessionStatus::Closed => Err(SessionError::Closed),
        }
    }

    fn incorporate(&mut self, request: Request) -> SessionResult<Incorporated> {
        let user = request.user;
        let seq = request.seq();

        match self.algorithm.process_remote(&mut self.buffer, request.clone()) {
            Ok(operation) => {
                self.remote_requests += 1;
                self.last_activity = Utc::now();
                self.emit(SessionEvent::Applied {
                    user,
                    seq,
                    operation,
                });
                Ok(Incorporated::Applied)
            }
            Err(OtError::NotReady { .. }) => Ok(Incorporated::NotReady(request)),
            Err(OtError::AlreadyProcessed { .. }) => Ok(Incorporated::Duplicate),
            Err(err) => Err(self.reject(err)),
        }
    }

    fn enqueue(&mut self, request: Request) -> SessionResult<()> {
        let max = self.config.max_pending_requests;
        if self.pending.len() >= max {
            tracing::warn!("Pending queue full, rejecting {}", request);
            return Err(SessionError::QueueFull(max));
        }
        tracing::debug!("Queueing {} until its dependencies arrive", request);
        self.pending.push_back(request);
        Ok(())
    }

    /// Retry queued requests until a full pass makes no progress.
    fn drain_pending(&mut self) -> SessionResult<usize> {
        let mut applied = 0;
        loop {
            let mut progressed = false;
            for _ in 0..self.pending.len() {
                let Some(request) = self.pending.pop_front() else {
                    break;
                };
                match self.incorporate(request) {
                    Ok(Incorporated::Applied) => {
                        applied += 1;
                        progressed = true;
                    }
                    Ok(Incorporated::NotReady(request)) => self.pending.push_back(request),
                    Ok(Incorporated::Duplicate) => {}
                    Err(err @ SessionError::Corrupted(_)) => return Err(err),
                    Err(err) => tracing::warn!("Dropping queued request: {}", err),
                }
            }
            if !progressed {
                return Ok(applied);
            }
        }
    }

    /// Turn an engine error into a session error, latching fatal ones.
    fn reject(&mut self, err: OtError) -> SessionError {
        if !err.is_fatal() {
            return SessionError::Engine(err);
        }

        let reason = err.to_string();
        if self.status == SessionStatus::Active {
            tracing::warn!("Session corrupted, resynchronization required: {}", reason);
            self.status = SessionStatus::Corrupted;
            self.corruption = Some(reason.clone());
            self.pending.clear();
            self.emit(SessionEvent::Corrupted {
                reason: reason.clone(),
            });
        }
        SessionError::Corrupted(reason)
    }

    fn publish_local(&mut self, request: Request) {
        self.local_requests += 1;
        self.last_activity = Utc::now();
        self.emit(SessionEvent::Outgoing(request));
    }

    fn emit(&self, event: SessionEvent) {
        // Sending fails only when nobody is subscribed.
        let _ = self.events.send(event);
    }
}
