//! # Request Correlator - synchronous calls over a framed transport
//!
//! ## Purpose
//!
//! Unanswered [`SyncRequest`]s are registered under their sync key before they
//! are written. When a [`Response`](codec::Response) or an echoed request with
//! the same key comes back, the entry is removed exactly once, the answer is
//! copied into the pending request, its waiter is woken and, if the request
//! carries a [`ResultsQueue`](codec::ResultsQueue), the answered request is
//! pushed onto that queue.
//!
//! ## Locking
//!
//! The pending table is a [`Tracked`] map (order [`order::PENDING_TABLE`]).
//! Each entry has its own slot mutex and condvar. The table lock and a slot
//! lock are never held together, and nothing blocks while either is held.

use codec::{Message, SyncKeyAllocator, SyncRequest};
use config::CorrelationConfig;
use locking::{order, LockRegistry, Tracked};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::{Result, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Waiting,
    Answered,
    Expired,
}

struct SlotState {
    request: SyncRequest,
    outcome: Outcome,
}

struct PendingSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl PendingSlot {
    fn new(request: SyncRequest) -> Self {
        Self {
            state: Mutex::new(SlotState {
                request,
                outcome: Outcome::Waiting,
            }),
            changed: Condvar::new(),
        }
    }
}

type PendingTable = HashMap<i32, Arc<PendingSlot>>;

struct CorrelatorInner {
    pending: Tracked<PendingTable>,
    keys: SyncKeyAllocator,
    request_timeout: Option<Duration>,
    queue_capacity: usize,
}

/// Table of requests awaiting replies. Clones share the same table.
#[derive(Clone)]
pub struct RequestCorrelator {
    inner: Arc<CorrelatorInner>,
}

impl RequestCorrelator {
    /// Correlator using the process-wide key counter and default settings
    pub fn new() -> Self {
        Self::with_allocator(SyncKeyAllocator::global())
    }

    /// Correlator drawing keys for [`new_request`](Self::new_request) from `keys`
    pub fn with_allocator(keys: SyncKeyAllocator) -> Self {
        Self::new_in(&LockRegistry::global(), keys, &CorrelationConfig::default())
    }

    pub fn from_config(config: &CorrelationConfig) -> Self {
        Self::new_in(&LockRegistry::global(), SyncKeyAllocator::global(), config)
    }

    pub fn new_in(locks: &LockRegistry, keys: SyncKeyAllocator, config: &CorrelationConfig) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                pending: Tracked::new_in(
                    locks,
                    "PendingTable",
                    order::PENDING_TABLE,
                    HashMap::new(),
                ),
                keys,
                request_timeout: config.request_timeout(),
                queue_capacity: config.results_queue_capacity,
            }),
        }
    }

    /// Unanswered request keyed from this correlator's allocator
    pub fn new_request(&self, prompt: impl Into<String>) -> SyncRequest {
        SyncRequest::with_key(self.inner.keys.next(), prompt)
    }

    /// Empty results queue sized from configuration
    pub fn new_results_queue(&self) -> codec::ResultsQueue {
        codec::ResultsQueue::bounded(self.inner.queue_capacity)
    }

    /// Deadline applied by [`PendingReply::wait`]; `None` waits forever
    pub fn request_timeout(&self) -> Option<Duration> {
        self.inner.request_timeout
    }

    /// Track `request` until its reply arrives.
    ///
    /// Answered requests are replies travelling back and are never tracked
    /// (`None`). Registering a key that is already pending joins the existing
    /// entry.
    pub fn register(&self, request: SyncRequest) -> Option<PendingReply> {
        if request.is_answered() {
            return None;
        }
        let sync_key = request.sync_key();
        let slot = {
            let mut pending = self.inner.pending.lock();
            match pending.get(&sync_key) {
                Some(existing) => {
                    warn!(sync_key, "Request already pending, sharing the existing entry");
                    Arc::clone(existing)
                }
                None => {
                    let slot = Arc::new(PendingSlot::new(request));
                    pending.insert(sync_key, Arc::clone(&slot));
                    slot
                }
            }
        };
        debug!(sync_key, "Registered pending request");
        Some(PendingReply {
            sync_key,
            slot,
            correlator: self.clone(),
        })
    }

    pub fn is_pending(&self, sync_key: i32) -> bool {
        self.inner.pending.lock().contains_key(&sync_key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Match `reply` against the pending table.
    ///
    /// Returns false when `reply` carries no key or nothing is pending under
    /// it: the request was already answered or expired, or the reply is a
    /// stray duplicate.
    pub fn complete(&self, reply: &Message) -> bool {
        let Some(sync_key) = reply.sync_key() else {
            return false;
        };
        let slot = self.inner.pending.lock().remove(&sync_key);
        let Some(slot) = slot else {
            debug!(sync_key, kind = reply.kind().name(), "No pending request for reply");
            return false;
        };

        let answered = {
            let mut state = slot.state.lock();
            if let Err(e) = state.request.apply_reply(reply) {
                warn!(sync_key, error = %e, "Reply could not be applied to its request");
            }
            state.outcome = Outcome::Answered;
            slot.changed.notify_all();
            state.request.clone()
        };
        debug!(
            sync_key,
            answer_id = answered.answer_id(),
            "Pending request answered"
        );

        if let Some(queue) = answered.results_queue() {
            if !queue.push(answered.clone()) {
                warn!(
                    sync_key,
                    queue = queue.id(),
                    "Answer kept only in its pending reply"
                );
            }
        }
        true
    }

    /// Stop waiting for `sync_key`. Waiters wake with [`TransportError::Expired`]
    /// and a late reply is dropped.
    pub fn expire(&self, sync_key: i32) -> bool {
        let slot = self.inner.pending.lock().remove(&sync_key);
        match slot {
            Some(slot) => {
                Self::mark_expired(&slot);
                debug!(sync_key, "Pending request expired");
                true
            }
            None => false,
        }
    }

    /// Expire only if the table still maps `sync_key` to `slot`
    fn expire_slot(&self, sync_key: i32, slot: &Arc<PendingSlot>) {
        let removed = {
            let mut pending = self.inner.pending.lock();
            match pending.get(&sync_key) {
                Some(current) if Arc::ptr_eq(current, slot) => pending.remove(&sync_key),
                _ => None,
            }
        };
        if removed.is_some() {
            Self::mark_expired(slot);
            debug!(sync_key, "Pending request timed out");
        }
    }

    fn mark_expired(slot: &PendingSlot) {
        let mut state = slot.state.lock();
        if state.outcome == Outcome::Waiting {
            state.outcome = Outcome::Expired;
        }
        slot.changed.notify_all();
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("pending", &self.pending_count())
            .field("request_timeout", &self.inner.request_timeout)
            .finish()
    }
}

/// Handle for one outstanding request
pub struct PendingReply {
    sync_key: i32,
    slot: Arc<PendingSlot>,
    correlator: RequestCorrelator,
}

impl PendingReply {
    pub fn sync_key(&self) -> i32 {
        self.sync_key
    }

    /// The answered request, if the reply has arrived
    pub fn try_answer(&self) -> Option<SyncRequest> {
        let state = self.slot.state.lock();
        (state.outcome == Outcome::Answered).then(|| state.request.clone())
    }

    /// Block for the answer, bounded by the correlator's configured timeout
    pub fn wait(&self) -> Result<SyncRequest> {
        match self.correlator.request_timeout() {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait_until(None),
        }
    }

    /// Block for at most `timeout`. On expiry the request stops being pending,
    /// so a late reply is dropped.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<SyncRequest> {
        match self.wait_until(Some(Instant::now() + timeout)) {
            Err(TransportError::Timeout { .. }) => {
                self.correlator.expire_slot(self.sync_key, &self.slot);
                // A reply may have landed between the timeout and the expiry
                match self.try_answer() {
                    Some(answered) => Ok(answered),
                    None => Err(TransportError::timeout(
                        format!("reply to request {}", self.sync_key),
                        timeout.as_millis() as u64,
                    )),
                }
            }
            other => other,
        }
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Result<SyncRequest> {
        let mut state = self.slot.state.lock();
        loop {
            match state.outcome {
                Outcome::Answered => return Ok(state.request.clone()),
                Outcome::Expired => {
                    return Err(TransportError::Expired {
                        sync_key: self.sync_key,
                    })
                }
                Outcome::Waiting => {}
            }
            match deadline {
                None => self.slot.changed.wait(&mut state),
                Some(deadline) => {
                    if self.slot.changed.wait_until(&mut state, deadline).timed_out()
                        && state.outcome == Outcome::Waiting
                    {
                        return Err(TransportError::timeout("reply", 0));
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("sync_key", &self.sync_key)
            .field("answered", &self.try_answer().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{RequestOption, Response};
    use std::thread;

    fn correlator() -> RequestCorrelator {
        let locks = LockRegistry::new(locking::RegistrySettings::quiet());
        RequestCorrelator::new_in(
            &locks,
            SyncKeyAllocator::starting_at(100),
            &CorrelationConfig::default(),
        )
    }

    fn question(correlator: &RequestCorrelator) -> SyncRequest {
        let mut request = correlator.new_request("Proceed?");
        request.add_option(RequestOption::new("Yes", 1, true)).unwrap();
        request.add_option(RequestOption::new("No", 2, true)).unwrap();
        request
    }

    #[test]
    fn test_answered_requests_are_not_registered() {
        let correlator = correlator();
        let mut request = question(&correlator);
        request.set_answer_by_id(1).unwrap();
        assert!(correlator.register(request).is_none());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_keys_come_from_the_allocator() {
        let correlator = correlator();
        assert_eq!(correlator.new_request("a").sync_key(), 100);
        assert_eq!(correlator.new_request("b").sync_key(), 101);
    }

    #[test]
    fn test_reply_removes_entry_exactly_once() {
        let correlator = correlator();
        let request = question(&correlator);
        let key = request.sync_key();
        let reply = correlator.register(request).unwrap();
        assert!(correlator.is_pending(key));

        let response: Message = Response::new(key, 2, "No").into();
        assert!(correlator.complete(&response));
        assert!(!correlator.complete(&response));
        assert!(!correlator.is_pending(key));

        let answered = reply.try_answer().unwrap();
        assert_eq!(answered.answer_id(), 2);
        assert_eq!(answered.answer_text(), Some("No"));
    }

    #[test]
    fn test_messages_without_keys_never_complete() {
        let correlator = correlator();
        assert!(!correlator.complete(&codec::ClientId::new(3).into()));
    }

    #[test]
    fn test_waiter_is_woken_by_reply() {
        let correlator = correlator();
        let request = question(&correlator);
        let key = request.sync_key();
        let reply = correlator.register(request).unwrap();

        let completer = correlator.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(completer.complete(&Response::new(key, 1, "Yes").into()));
        });

        let answered = reply.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(answered.answer_id(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_timeout_expires_entry_and_drops_late_reply() {
        let correlator = correlator();
        let request = question(&correlator);
        let key = request.sync_key();
        let reply = correlator.register(request).unwrap();

        let err = reply.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(!correlator.is_pending(key));
        assert!(!correlator.complete(&Response::new(key, 1, "Yes").into()));
        assert!(reply.try_answer().is_none());
    }

    #[test]
    fn test_expire_wakes_waiter() {
        let correlator = correlator();
        let request = question(&correlator);
        let key = request.sync_key();
        let reply = correlator.register(request).unwrap();

        let expirer = correlator.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(expirer.expire(key));
        });

        let err = reply.wait_timeout(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TransportError::Expired { sync_key } if sync_key == key));
        handle.join().unwrap();
    }

    #[test]
    fn test_results_queue_receives_answered_requests() {
        let correlator = correlator();
        let queue = correlator.new_results_queue();
        let mut keys = Vec::new();
        for _ in 0..3 {
            let mut request = question(&correlator);
            request.set_results_queue(Some(queue.clone()));
            keys.push(request.sync_key());
            // Handles are dropped; the queue is the only way back
            correlator.register(request).unwrap();
        }

        for &key in keys.iter().rev() {
            assert!(correlator.complete(&Response::new(key, 1, "Yes").into()));
        }
        let delivered: Vec<i32> = (0..3)
            .map(|_| queue.recv_timeout(Duration::from_secs(1)).unwrap().sync_key())
            .collect();
        assert_eq!(delivered, keys.iter().rev().copied().collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_registration_shares_entry() {
        let correlator = correlator();
        let request = question(&correlator);
        let key = request.sync_key();
        let first = correlator.register(request.clone()).unwrap();
        let second = correlator.register(request).unwrap();
        assert_eq!(correlator.pending_count(), 1);

        assert!(correlator.complete(&Response::new(key, 2, "No").into()));
        assert_eq!(first.try_answer().unwrap().answer_id(), 2);
        assert_eq!(second.try_answer().unwrap().answer_id(), 2);
    }
}
