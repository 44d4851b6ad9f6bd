//! The concurrency-control algorithm.
//!
//! [`Algorithm`] owns the current state vector, the request logs, the local
//! execution history and the undo stacks of one document. It never owns the
//! document itself: every entry point receives the [`Buffer`] to edit.
//!
//! Remote requests are translated from their origin to the current state by
//! walking the state lattice backwards: the request is first translated to the
//! state right before the last concurrent request `q` it has not seen, `q` is
//! translated to that same state, and the two are transformed against each
//! other. Intermediate translations are memoised in the request logs.
//!
//! Requests address slots of the document [`Layout`] rather than buffer
//! positions. Local edits are rewritten onto slots before they are logged, and
//! every executed operation goes through the layout on its way to the buffer.
//! Insertion ties are decided by user id alone.
//!
//! All calls must be made sequentially. After the first fatal error the
//! algorithm refuses further work with [`OtError::SessionCorrupted`].

use crate::buffer::Buffer;
use crate::error::{OtError, OtResult};
use crate::history::ExecutionHistory;
use crate::layout::Layout;
use crate::operation::{Operation, Precedence};
use crate::request::{Request, RequestKind};
use crate::request_log::RequestLogs;
use crate::state_vector::StateVector;
use crate::undo::UndoStacks;
use crate::user::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// When request log entries may be dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Never evict.
    Unbounded,
    /// Evict once every known participant has seen an entry and no retained
    /// request can be transformed against it anymore.
    #[default]
    Stable,
    /// Like `Stable`, but never keep more than `max_entries` per user.
    /// Requests that later need an evicted entry fail with
    /// [`OtError::HistoryTruncated`].
    Capped { max_entries: usize },
}

/// Tunables of the algorithm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    /// Request log retention
    pub retention: RetentionPolicy,
    /// Maximum number of undo steps per user
    pub max_undo_steps: usize,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::Stable,
            max_undo_steps: 100,
        }
    }
}

/// Concurrency control for one document.
#[derive(Debug)]
pub struct Algorithm {
    config: AlgorithmConfig,
    /// Requests incorporated into the buffer
    current: StateVector,
    logs: RequestLogs,
    history: ExecutionHistory,
    undo: UndoStacks,
    /// Last state each remote participant is known to have reached
    participants: BTreeMap<UserId, StateVector>,
    /// Slots of the buffer; taken from the first buffer seen unless the
    /// algorithm joined from a snapshot
    layout: Option<Layout>,
    /// Whether the most recently executed operation is reversible
    head_reversible: bool,
    /// Reason of the first fatal error
    corrupted: Option<String>,
}

impl Algorithm {
    /// Algorithm for a document nobody has edited yet.
    ///
    /// The layout is created from the buffer passed to the first call.
    pub fn new(config: AlgorithmConfig) -> Self {
        Self::build(config, StateVector::new(), None)
    }

    /// Algorithm joining a document at `initial`, e.g. after loading a
    /// snapshot. `layout` must be the layout of the snapshot, as exported
    /// by [`Algorithm::layout`] at that state. Requests before `initial`
    /// are not available.
    pub fn with_state(config: AlgorithmConfig, initial: StateVector, layout: Layout) -> Self {
        Self::build(config, initial, Some(layout))
    }

    fn build(config: AlgorithmConfig, initial: StateVector, layout: Option<Layout>) -> Self {
        let undo = UndoStacks::new(config.max_undo_steps);
        Self {
            config,
            logs: RequestLogs::starting_at(&initial),
            current: initial,
            history: ExecutionHistory::new(),
            undo,
            participants: BTreeMap::new(),
            layout,
            head_reversible: true,
            corrupted: None,
        }
    }

    // ========== Queries ==========

    pub fn config(&self) -> &AlgorithmConfig {
        &self.config
    }

    /// The state of the local buffer.
    pub fn current(&self) -> &StateVector {
        &self.current
    }

    /// A logged request as issued.
    pub fn request(&self, user: UserId, seq: u64) -> OtResult<&Request> {
        self.logs.get(user, seq)
    }

    /// Number of requests kept in the logs.
    pub fn retained_requests(&self) -> usize {
        self.logs.total_entries()
    }

    /// Slot layout of the buffer, once known. Snapshots store it next to the
    /// text so that a joining site agrees on slot positions.
    pub fn layout(&self) -> Option<&Layout> {
        self.layout.as_ref()
    }

    pub fn has_undo(&self, user: UserId) -> bool {
        self.undo.has_undo(user)
    }

    pub fn has_redo(&self, user: UserId) -> bool {
        self.undo.has_redo(user)
    }

    /// Whether the most recently executed operation is reversible.
    pub fn head_is_reversible(&self) -> bool {
        self.head_reversible
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted.is_some()
    }

    /// Why the algorithm stopped working, if it did.
    pub fn corruption_reason(&self) -> Option<&str> {
        self.corrupted.as_deref()
    }

    /// Known remote participants and the state they last reported.
    pub fn participants(&self) -> impl Iterator<Item = (UserId, &StateVector)> {
        self.participants.iter().map(|(&user, vector)| (user, vector))
    }

    // ========== Participants ==========

    /// Register a remote participant that has reached `vector`.
    ///
    /// Log entries it has not seen are retained until it reports progress.
    pub fn add_user(&mut self, user: UserId, vector: StateVector) {
        tracing::debug!("{} joined at [{}]", user, vector);
        self.participants.insert(user, vector.meet(&self.current));
    }

    /// Forget a participant that left the session.
    pub fn remove_user(&mut self, user: UserId) {
        tracing::debug!("{} left", user);
        self.participants.remove(&user);
        self.undo.remove_user(user);
        self.cleanup();
    }

    // ========== Entry points ==========

    /// Execute a local edit of `user` and return the request to broadcast.
    ///
    /// `operation` addresses buffer positions; the request carries it on
    /// layout slots with the removed content captured. An operation that does
    /// not fit the buffer is rejected with [`OtError::Buffer`] and changes
    /// nothing.
    pub fn process_local<B: Buffer + ?Sized>(
        &mut self,
        buffer: &mut B,
        user: UserId,
        operation: Operation,
    ) -> OtResult<Request> {
        self.check_healthy()?;
        operation.validate()?;

        let layout = self.layout_mut(buffer.len());
        let localized = layout
            .check_buffer(buffer)
            .map(|()| layout.localize(&operation));
        let operation = match localized {
            Ok(localized) => localized?,
            Err(err) => return self.fail(err),
        };

        self.execute_local(buffer, user, operation, RequestKind::Do)
    }

    /// Incorporate a request received from another site and return the
    /// operation as applied to the buffer, in buffer positions.
    pub fn process_remote<B: Buffer + ?Sized>(
        &mut self,
        buffer: &mut B,
        request: Request,
    ) -> OtResult<Operation> {
        self.check_healthy()?;

        let user = request.user;
        let seq = request.seq();
        let processed = self.current.get(user);

        if seq <= processed {
            tracing::debug!("Ignoring duplicate request {} from {}", seq, user);
            return Err(OtError::AlreadyProcessed { user, seq });
        }
        if seq > processed + 1 || !StateVector::causally_ready(&request.origin, &self.current) {
            return Err(OtError::NotReady {
                user,
                seq,
                origin: request.origin,
                current: self.current.clone(),
            });
        }
        if let Some(known) = self.participants.get(&user) {
            if !known.le(&request.origin) {
                let err = OtError::NonMonotonic {
                    user,
                    known: known.clone(),
                    received: request.origin,
                };
                return self.fail(err);
            }
        }
        request.operation.validate()?;

        if let Err(err) = self
            .logs
            .ensure_available(&request.origin, &self.current, user)
        {
            return self.fail(err);
        }

        let current = self.current.clone();
        let operation = match self.translate(&request, &current) {
            Ok(operation) => operation,
            Err(err) => return self.fail(err),
        };

        let layout = self.layout_mut(buffer.len());
        let checked = layout
            .check_buffer(buffer)
            .map(|()| layout.check_bounds(&operation));
        match checked {
            Err(err) => return self.fail(err),
            Ok(Err(err)) => {
                self.logs.log_mut(user).forget(seq);
                tracing::warn!("Rejecting request {} from {}: {}", seq, user, err);
                return Err(OtError::Malformed(err.to_string()));
            }
            Ok(Ok(())) => {}
        }
        let applied = match self.layout_mut(buffer.len()).execute(&operation, user, buffer) {
            Ok(applied) => applied,
            Err(err) => return self.fail(as_invariant(err)),
        };

        self.head_reversible = operation.is_reversible();
        self.history.push(user, seq, applied.operation);
        let target = request.target();
        if let Err(err) = self.logs.append(request) {
            return self.fail(err);
        }
        self.current.increment(user);
        self.participants.insert(user, target);

        tracing::debug!(
            "Applied request {} from {} as {}, now at [{}]",
            seq,
            user,
            applied.visible,
            self.current
        );

        self.cleanup();
        Ok(applied.visible)
    }

    /// Undo the most recent edit of `user` that has not been undone.
    ///
    /// Returns `None` when there is nothing to undo.
    pub fn undo<B: Buffer + ?Sized>(
        &mut self,
        buffer: &mut B,
        user: UserId,
    ) -> OtResult<Option<Request>> {
        self.check_healthy()?;

        let Some(index) = self.undo.pop_undo(user) else {
            tracing::debug!("Nothing to undo for {}", user);
            return Ok(None);
        };

        match self.step_back(buffer, user, index, RequestKind::Undo) {
            Ok(request) => Ok(Some(request)),
            Err(err) => {
                if !err.is_fatal() {
                    self.undo.restore_undo(user, index);
                }
                Err(err)
            }
        }
    }

    /// Redo the most recently undone edit of `user`.
    ///
    /// Returns `None` when there is nothing to redo.
    pub fn redo<B: Buffer + ?Sized>(
        &mut self,
        buffer: &mut B,
        user: UserId,
    ) -> OtResult<Option<Request>> {
        self.check_healthy()?;

        let Some(index) = self.undo.pop_redo(user) else {
            tracing::debug!("Nothing to redo for {}", user);
            return Ok(None);
        };

        match self.step_back(buffer, user, index, RequestKind::Redo) {
            Ok(request) => Ok(Some(request)),
            Err(err) => {
                if !err.is_fatal() {
                    self.undo.restore_redo(user, index);
                }
                Err(err)
            }
        }
    }

    /// Translate a logged or incoming request to `to`.
    ///
    /// `to` must be a causally closed state above the request's origin that
    /// does not contain the request itself.
    pub fn translate(&mut self, request: &Request, to: &StateVector) -> OtResult<Operation> {
        if request.origin == *to {
            return Ok(request.operation.clone());
        }

        let seq = request.seq();
        if let Some(cached) = self
            .logs
            .log(request.user)
            .and_then(|log| log.cached(seq, to))
        {
            return Ok(cached.clone());
        }

        if !request.origin.le(to) || to.get(request.user) != request.origin.get(request.user) {
            return Err(OtError::Invariant(format!(
                "cannot translate {} to [{}]",
                request, to
            )));
        }

        let last = self.last_concurrent(request, to)?;
        let before = to.with_decremented(last.user);

        let operation = self.translate(request, &before)?;
        let against = self.translate(&last, &before)?;
        let translated =
            operation.transform(&against, Precedence::by_user(request.user, last.user));

        tracing::trace!(
            "Translated {} from {}: {} against {} at [{}] gives {}",
            seq,
            request.user,
            operation,
            against,
            before,
            translated
        );

        self.logs
            .log_mut(request.user)
            .cache(seq, to.clone(), translated.clone());
        Ok(translated)
    }

    // ========== Internals ==========

    fn check_healthy(&self) -> OtResult<()> {
        match &self.corrupted {
            Some(reason) => Err(OtError::SessionCorrupted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Latch fatal errors and pass every error on.
    fn fail<T>(&mut self, err: OtError) -> OtResult<T> {
        if err.is_fatal() && self.corrupted.is_none() {
            tracing::error!("Session corrupted: {}", err);
            self.corrupted = Some(err.to_string());
        }
        Err(err)
    }

    fn layout_mut(&mut self, buffer_len: usize) -> &mut Layout {
        self.layout.get_or_insert_with(|| Layout::new(buffer_len))
    }

    /// Execute an operation on layout slots as a new request of `user`.
    fn execute_local<B: Buffer + ?Sized>(
        &mut self,
        buffer: &mut B,
        user: UserId,
        operation: Operation,
        kind: RequestKind,
    ) -> OtResult<Request> {
        let applied = match self.layout_mut(buffer.len()).execute(&operation, user, buffer) {
            Ok(applied) => applied,
            Err(err) if err.is_fatal() => return self.fail(err),
            Err(err) => return Err(err),
        };

        let request =
            Request::new(user, self.current.clone(), applied.operation.clone()).with_kind(kind);
        self.head_reversible = true;
        let affects_buffer = applied.visible.affects_buffer();
        let index = self.history.push(user, request.seq(), applied.operation);
        if let Err(err) = self.logs.append(request.clone()) {
            return self.fail(err);
        }
        self.current.increment(user);

        match kind {
            RequestKind::Do if affects_buffer => self.undo.record(user, index),
            RequestKind::Do => {}
            RequestKind::Undo => self.undo.record_undone(user, index),
            RequestKind::Redo => self.undo.record_redone(user, index),
        }

        tracing::debug!(
            "Executed local {:?} request {} from {}, now at [{}]",
            kind,
            request.seq(),
            user,
            self.current
        );

        self.cleanup();
        Ok(request)
    }

    /// Revert the executed operation at history `index` and run the inverse,
    /// moved forward to the current state, as a new local request.
    fn step_back<B: Buffer + ?Sized>(
        &mut self,
        buffer: &mut B,
        user: UserId,
        index: u64,
        kind: RequestKind,
    ) -> OtResult<Request> {
        let Some(target) = self.history.get(index) else {
            return self.fail(OtError::Invariant(format!(
                "history entry {} referenced by the undo stack of {} is gone",
                index, user
            )));
        };

        let mut inverse = target.operation.revert()?;
        for later in self.history.after(index) {
            let precedence = if later.user == target.user {
                Precedence::After
            } else {
                Precedence::by_user(target.user, later.user)
            };
            inverse = inverse.transform(&later.operation, precedence);
        }

        self.execute_local(buffer, user, inverse, kind)
    }

    /// The newest request in `to` that is unknown to `request` and that no
    /// other request in `to` depends on.
    fn last_concurrent(&self, request: &Request, to: &StateVector) -> OtResult<Request> {
        let unseen: Vec<(UserId, u64)> = to
            .iter()
            .filter(|&(user, count)| user != request.user && count > request.origin.get(user))
            .collect();

        for &(user, count) in &unseen {
            let candidate = self.logs.get(user, count)?;
            let mut depended_on = false;
            for &(other, other_count) in &unseen {
                if other != user && self.logs.get(other, other_count)?.origin.get(user) >= count {
                    depended_on = true;
                    break;
                }
            }
            if !depended_on {
                return Ok(candidate.clone());
            }
        }

        Err(OtError::Invariant(format!(
            "no request to translate {} towards [{}]",
            request, to
        )))
    }

    /// Lowest state any participant may still issue requests from.
    fn lowest(&self) -> StateVector {
        self.participants
            .values()
            .fold(self.current.clone(), |lowest, vector| lowest.meet(vector))
    }

    fn cleanup(&mut self) {
        let lowest = self.lowest();
        let evicted = match self.config.retention {
            RetentionPolicy::Unbounded => {
                self.logs.prune_caches(&lowest);
                0
            }
            RetentionPolicy::Stable => self.logs.cleanup(&lowest, None),
            RetentionPolicy::Capped { max_entries } => self.logs.cleanup(&lowest, Some(max_entries)),
        };
        if evicted > 0 {
            tracing::trace!(
                "Evicted {} log entries below [{}], {} translations cached",
                evicted,
                lowest,
                self.logs.cache_len()
            );
        }

        let keep = self
            .undo
            .oldest_referenced()
            .unwrap_or_else(|| self.history.next_index());
        self.history.trim_before(keep);
    }
}

/// An execution failure after every check passed means the buffer and the
/// layout disagree.
fn as_invariant(err: OtError) -> OtError {
    match err {
        OtError::Buffer(err) => OtError::Invariant(format!("buffer rejected a checked operation: {}", err)),
        err => err,
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::new(AlgorithmConfig::default())
    }
}
