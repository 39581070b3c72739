//! OrderedLock - reentrant mutual exclusion validated against a global lock order
//!
//! ## Purpose
//!
//! A named, ordered, reentrant lock. Exclusive acquisition (`acquire`/`lock`) and
//! non-exclusive intent tracking (`track`/`track_scope`) both push the lock onto
//! the calling thread's stack in the [`LockRegistry`], where the descending-order
//! rule is checked.
//!
//! ## Lock Ordering
//!
//! The record's state mutex is never held while the registry is consulted:
//! `acquire` drops it before tracking and `release` untracks before retaking it.
//!
//! ## Usage
//!
//! ```rust
//! use locking::{order, OrderedLock};
//!
//! let table = OrderedLock::new("Table", order::depends_on(&[order::LEAF]));
//! let row = OrderedLock::new("Row", order::LEAF);
//!
//! let _table = table.lock();
//! let _row = row.lock(); // 2 then 1: descending, no report
//! ```

use parking_lot::MutexGuard;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::diag;
use crate::error::{LockError, Result};
use crate::registry::{LockRecord, LockRegistry, LockState};
use crate::report::{current_thread_label, ReportKind};

/// Reentrant, ordered, deadlock-checked lock
pub struct OrderedLock {
    record: Arc<LockRecord>,
    registry: LockRegistry,
}

impl OrderedLock {
    /// Lock registered with [`LockRegistry::global`]
    pub fn new(name: &str, order: u32) -> Self {
        Self::new_in(&LockRegistry::global(), name, order)
    }

    pub fn new_in(registry: &LockRegistry, name: &str, order: u32) -> Self {
        Self {
            record: Arc::new(LockRecord::new(name, order, None)),
            registry: registry.clone(),
        }
    }

    /// Lock guarding a closable stream. `closer` is invoked by
    /// [`LockRegistry::close_longest_stalled`] when the lock is held too long.
    pub fn with_stream_closer(
        registry: &LockRegistry,
        name: &str,
        order: u32,
        closer: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            record: Arc::new(LockRecord::new(name, order, Some(Box::new(closer)))),
            registry: registry.clone(),
        }
    }

    /// Same-order siblings sharing `parent` may nest while `parent` is tracked
    pub fn set_peer_authority(&self, parent: &OrderedLock) {
        self.record
            .set_peer_authority(Some(Arc::clone(&parent.record)));
    }

    pub fn clear_peer_authority(&self) {
        self.record.set_peer_authority(None);
    }

    /// `"name[order]"`
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn order(&self) -> u32 {
        self.record.order
    }

    pub fn hold_count(&self) -> u32 {
        self.record.state.lock().hold_count
    }

    pub fn wait_count(&self) -> u32 {
        self.record.state.lock().wait_count
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.record.state.lock().owner
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner() == Some(thread::current().id())
    }

    pub fn registry(&self) -> &LockRegistry {
        &self.registry
    }

    /// Block until the lock is owned by the calling thread
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.record.state.lock();
        if state.owner == Some(me) {
            state.hold_count += 1;
            return;
        }

        state.wait_count += 1;
        while state.hold_count > 0 {
            self.record.released.wait(&mut state);
        }
        state.wait_count -= 1;
        Self::take(&mut state, me);
        drop(state);

        self.registry.track(&self.record);
    }

    /// Take the lock only if it is free or already owned by the calling thread
    pub fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.record.state.lock();
        if state.owner == Some(me) {
            state.hold_count += 1;
            return true;
        }
        if state.hold_count > 0 {
            return false;
        }
        Self::take(&mut state, me);
        drop(state);

        self.registry.track(&self.record);
        true
    }

    fn take(state: &mut MutexGuard<'_, LockState>, me: ThreadId) {
        state.hold_count = 1;
        state.owner = Some(me);
        state.owner_name = Some(current_thread_label());
    }

    /// Undo one `acquire`. Only the owning thread may release.
    pub fn release(&self) -> Result<()> {
        let me = thread::current().id();
        {
            let mut state = self.record.state.lock();
            if state.owner != Some(me) || state.hold_count == 0 {
                let err = LockError::not_owner(
                    self.record.name.clone(),
                    current_thread_label(),
                    state.owner_name.clone(),
                );
                drop(state);
                diag::fatal(&err.to_string());
                return Err(err);
            }
            if state.hold_count > 1 {
                state.hold_count -= 1;
                return Ok(());
            }
        }

        // Still owned by us, so nobody else can touch the counts in between
        self.registry.untrack(&self.record);

        let mut state = self.record.state.lock();
        state.hold_count = 0;
        state.owner = None;
        state.owner_name = None;
        drop(state);
        self.record.released.notify_one();
        Ok(())
    }

    /// Acquire and release on drop
    pub fn lock(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        self.try_acquire().then(|| LockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Record intent to hold this lock without taking it
    pub fn track(&self) {
        self.registry.track(&self.record);
    }

    pub fn untrack(&self) {
        self.registry.untrack(&self.record);
    }

    /// Report and return true if tracking this lock now would break the order.
    /// Nothing is pushed.
    pub fn check(&self) -> bool {
        self.registry.check(&self.record)
    }

    /// Whether the calling thread currently tracks or holds this lock
    pub fn is_tracked(&self) -> bool {
        self.registry.is_tracked(&self.record)
    }

    /// Track and untrack on drop
    pub fn track_scope(&self) -> TrackGuard<'_> {
        self.track();
        TrackGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }
}

impl Drop for OrderedLock {
    fn drop(&mut self) {
        let (hold_count, owner) = {
            let state = self.record.state.lock();
            (state.hold_count, state.owner_name.clone())
        };
        let track_count = self.registry.track_count(&self.record);
        let reason = if hold_count > 0 {
            format!(
                "Lock {} destroyed while held {} time(s) by thread {}",
                self.record.name,
                hold_count,
                owner.as_deref().unwrap_or("unknown")
            )
        } else if track_count > 0 {
            format!(
                "Lock {} destroyed while still tracked {} time(s)",
                self.record.name, track_count
            )
        } else {
            return;
        };
        self.registry.report(
            ReportKind::Leak,
            reason,
            self.record.describe(),
            &[&self.record.name],
        );
    }
}

impl fmt::Display for OrderedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.record.describe())
    }
}

impl fmt::Debug for OrderedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedLock")
            .field("name", &self.record.name)
            .field("order", &self.record.order)
            .finish()
    }
}

/// Releases its [`OrderedLock`] when dropped. Must be dropped on the acquiring thread.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a OrderedLock,
    _not_send: PhantomData<*const ()>,
}

impl LockGuard<'_> {
    pub fn lock(&self) -> &OrderedLock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // The guard never leaves the owning thread, so this cannot fail
        let _ = self.lock.release();
    }
}

/// Untracks its [`OrderedLock`] when dropped
#[must_use = "tracking ends as soon as the guard is dropped"]
pub struct TrackGuard<'a> {
    lock: &'a OrderedLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for TrackGuard<'_> {
    fn drop(&mut self) {
        self.lock.untrack();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrySettings;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn quiet() -> LockRegistry {
        LockRegistry::new(RegistrySettings::quiet())
    }

    #[test]
    fn test_name_includes_order() {
        let lock = OrderedLock::new_in(&quiet(), "Session", 4);
        assert_eq!(lock.name(), "Session[4]");
        assert_eq!(lock.order(), 4);
        assert_eq!(lock.owner(), None);
    }

    #[test]
    fn test_try_lock_contended() {
        let registry = quiet();
        let lock = Arc::new(OrderedLock::new_in(&registry, "Busy", 1));
        let guard = lock.lock();

        let other = Arc::clone(&lock);
        let acquired = thread::spawn(move || other.try_acquire()).join().unwrap();
        assert!(!acquired);

        // Reentrant try succeeds on the owner
        let inner = lock.try_lock();
        assert!(inner.is_some());
        assert_eq!(lock.hold_count(), 2);
        drop(inner);
        drop(guard);
        assert_eq!(lock.hold_count(), 0);
    }

    #[test]
    fn test_waiter_is_counted_and_woken() {
        let registry = quiet();
        let lock = Arc::new(OrderedLock::new_in(&registry, "Gate", 1));
        let entered = Arc::new(AtomicBool::new(false));

        lock.acquire();
        let waiter = {
            let lock = Arc::clone(&lock);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let _guard = lock.lock();
                entered.store(true, Ordering::SeqCst);
            })
        };

        while lock.wait_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!entered.load(Ordering::SeqCst));
        lock.release().unwrap();
        waiter.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(lock.wait_count(), 0);
    }

    #[test]
    fn test_track_scope_balances() {
        let registry = quiet();
        let lock = OrderedLock::new_in(&registry, "Intent", 2);
        {
            let _scope = lock.track_scope();
            assert!(lock.is_tracked());
        }
        assert!(!lock.is_tracked());
        assert_eq!(registry.reported_count(), 0);
    }

    #[test]
    fn test_drop_while_held_reports_leak() {
        let registry = quiet();
        let lock = OrderedLock::new_in(&registry, "Dropped", 1);
        lock.acquire();
        drop(lock);
        assert_eq!(registry.reported_count(), 1);
    }
}
