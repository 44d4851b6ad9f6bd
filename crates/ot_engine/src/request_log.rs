//! Per-user request logs.
//!
//! Every user has a gap-free log of the requests it issued, stored as issued
//! (relative to their true origin). Old entries are evicted once no current or
//! future transformation can need them; looking one up afterwards fails with
//! [`OtError::HistoryTruncated`].
//!
//! Each log also memoises translations of its requests to other states, keyed
//! by `(seq, vector)`.

use crate::error::{OtError, OtResult};
use crate::operation::Operation;
use crate::request::Request;
use crate::state_vector::StateVector;
use crate::user::UserId;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Retained window of one user's requests.
#[derive(Clone, Debug)]
pub struct RequestLog {
    user: UserId,
    /// Sequence number of the oldest retained entry
    begin: u64,
    entries: VecDeque<Request>,
    cache: HashMap<(u64, StateVector), Operation>,
}

impl RequestLog {
    /// Empty log whose first request will have sequence number 1.
    pub fn new(user: UserId) -> Self {
        Self::starting_after(user, 0)
    }

    /// Empty log for a user whose first `known` requests predate this engine.
    pub fn starting_after(user: UserId, known: u64) -> Self {
        Self {
            user,
            begin: known + 1,
            entries: VecDeque::new(),
            cache: HashMap::new(),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Sequence number of the oldest retained entry.
    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// Sequence number of the newest entry (`begin - 1` when empty).
    pub fn end(&self) -> u64 {
        self.begin + self.entries.len() as u64 - 1
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the next request of this user.
    pub fn append(&mut self, request: Request) -> OtResult<()> {
        if request.user != self.user {
            return Err(OtError::Invariant(format!(
                "request of {} appended to the log of {}",
                request.user, self.user
            )));
        }

        let expected = self.end() + 1;
        if request.seq() != expected {
            return Err(OtError::SequenceGap {
                user: self.user,
                expected,
                actual: request.seq(),
            });
        }

        self.entries.push_back(request);
        Ok(())
    }

    /// Look up the request with sequence number `seq`.
    pub fn get(&self, seq: u64) -> OtResult<&Request> {
        if seq < self.begin {
            return Err(OtError::HistoryTruncated {
                user: self.user,
                seq,
            });
        }
        self.entries
            .get((seq - self.begin) as usize)
            .ok_or_else(|| {
                OtError::Invariant(format!(
                    "request {} of {} has not been logged (end {})",
                    seq,
                    self.user,
                    self.end()
                ))
            })
    }

    /// Retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.entries.iter()
    }

    /// Entries with a sequence number above `seq`, oldest first.
    pub fn entries_after(&self, seq: u64) -> impl Iterator<Item = &Request> {
        let skip = seq.saturating_sub(self.begin - 1) as usize;
        self.entries.iter().skip(skip)
    }

    /// Drop every entry with a sequence number up to and including `seq`.
    pub fn evict_through(&mut self, seq: u64) -> usize {
        let mut evicted = 0;
        while self.begin <= seq && self.entries.pop_front().is_some() {
            self.begin += 1;
            evicted += 1;
        }
        if evicted > 0 {
            let begin = self.begin;
            self.cache.retain(|(seq, _), _| *seq >= begin);
        }
        evicted
    }

    // ========== Translation cache ==========

    pub fn cached(&self, seq: u64, vector: &StateVector) -> Option<&Operation> {
        self.cache.get(&(seq, vector.clone()))
    }

    pub fn cache(&mut self, seq: u64, vector: StateVector, operation: Operation) {
        self.cache.insert((seq, vector), operation);
    }

    /// Forget all cached translations of request `seq`.
    pub fn forget(&mut self, seq: u64) {
        self.cache.retain(|(cached, _), _| *cached != seq);
    }

    /// Keep only translations to states at or above `lowest`.
    pub fn prune_cache(&mut self, lowest: &StateVector) {
        let begin = self.begin;
        self.cache
            .retain(|(seq, vector), _| *seq >= begin && lowest.le(vector));
    }

    pub(crate) fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// The logs of all users, visited in ascending user order.
#[derive(Clone, Debug, Default)]
pub struct RequestLogs {
    logs: BTreeMap<UserId, RequestLog>,
}

impl RequestLogs {
    pub fn new() -> Self {
        Self {
            logs: BTreeMap::new(),
        }
    }

    /// Logs for an engine joining at `initial`: earlier requests are not retained.
    pub fn starting_at(initial: &StateVector) -> Self {
        Self {
            logs: initial
                .iter()
                .map(|(user, count)| (user, RequestLog::starting_after(user, count)))
                .collect(),
        }
    }

    pub fn log(&self, user: UserId) -> Option<&RequestLog> {
        self.logs.get(&user)
    }

    /// The log of `user`, created empty on first use.
    pub fn log_mut(&mut self, user: UserId) -> &mut RequestLog {
        self.logs
            .entry(user)
            .or_insert_with(|| RequestLog::new(user))
    }

    /// Iterate over all logs in ascending user order.
    pub fn iter(&self) -> impl Iterator<Item = &RequestLog> {
        self.logs.values()
    }

    pub fn append(&mut self, request: Request) -> OtResult<()> {
        self.log_mut(request.user).append(request)
    }

    pub fn get(&self, user: UserId, seq: u64) -> OtResult<&Request> {
        match self.logs.get(&user) {
            Some(log) => log.get(seq),
            None => Err(OtError::HistoryTruncated { user, seq }),
        }
    }

    /// Every logged request that `origin` does not know about, grouped by
    /// user in ascending order, oldest first within a user.
    pub fn entries_concurrent_with(&self, origin: &StateVector) -> Vec<&Request> {
        self.logs
            .values()
            .flat_map(|log| log.entries_after(origin.get(log.user())))
            .collect()
    }

    /// Check that every request between `origin` and `current` that a request
    /// from `sender` would be transformed against is still retained.
    pub fn ensure_available(
        &self,
        origin: &StateVector,
        current: &StateVector,
        sender: UserId,
    ) -> OtResult<()> {
        for (user, count) in current.iter() {
            let known = origin.get(user);
            if user == sender || count <= known {
                continue;
            }
            self.get(user, known + 1)?;
        }
        Ok(())
    }

    /// Evict entries nobody can need anymore.
    ///
    /// `lowest` is the component-wise minimum of every participant's state;
    /// future requests originate at or above it and are only transformed
    /// against entries above it. Such a live entry may in turn need every
    /// entry its own origin does not know, so the bound per user is lowered
    /// until no live entry reaches below it. `cap` additionally limits each
    /// log's length. Returns the number of evicted entries.
    pub fn cleanup(&mut self, lowest: &StateVector, cap: Option<usize>) -> usize {
        let mut bounds: BTreeMap<UserId, u64> = self
            .logs
            .keys()
            .map(|&user| (user, lowest.get(user)))
            .collect();

        loop {
            let mut changed = false;
            for request in self.logs.values().flat_map(RequestLog::iter) {
                let live = request.seq() > bounds.get(&request.user).copied().unwrap_or(0);
                if !live {
                    continue;
                }
                for (&user, bound) in bounds.iter_mut() {
                    let known = request.origin.get(user);
                    if user != request.user && known < *bound {
                        *bound = known;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let mut evicted = 0;
        for (user, bound) in bounds {
            if let Some(log) = self.logs.get_mut(&user) {
                evicted += log.evict_through(bound);
                if let Some(cap) = cap {
                    if log.len() > cap {
                        let excess = (log.len() - cap) as u64;
                        evicted += log.evict_through(log.begin() + excess - 1);
                    }
                }
                log.prune_cache(lowest);
            }
        }
        evicted
    }

    /// Drop cached translations below `lowest` without evicting entries.
    pub fn prune_caches(&mut self, lowest: &StateVector) {
        for log in self.logs.values_mut() {
            log.prune_cache(lowest);
        }
    }

    /// Total number of retained entries over all logs.
    pub fn total_entries(&self) -> usize {
        self.logs.values().map(RequestLog::len).sum()
    }

    /// Total number of cached translations over all logs.
    pub(crate) fn cache_len(&self) -> usize {
        self.logs.values().map(RequestLog::cache_len).sum()
    }
}
