//! Tracked<T> - a plain mutex validated by lock-order tracking
//!
//! Exclusion comes from `parking_lot::Mutex`; an [`OrderedLock`] is only
//! tracked around the critical section so the order checker still sees it.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};

use crate::lock::{OrderedLock, TrackGuard};
use crate::registry::LockRegistry;

pub struct Tracked<T> {
    lock: OrderedLock,
    data: Mutex<T>,
}

impl<T> Tracked<T> {
    pub fn new(name: &str, order: u32, value: T) -> Self {
        Self::new_in(&LockRegistry::global(), name, order, value)
    }

    pub fn new_in(registry: &LockRegistry, name: &str, order: u32, value: T) -> Self {
        Self {
            lock: OrderedLock::new_in(registry, name, order),
            data: Mutex::new(value),
        }
    }

    /// Track, then lock. The mutex is released before tracking ends.
    pub fn lock(&self) -> TrackedGuard<'_, T> {
        let track = self.lock.track_scope();
        TrackedGuard {
            data: self.data.lock(),
            _track: track,
        }
    }

    pub fn try_lock(&self) -> Option<TrackedGuard<'_, T>> {
        let track = self.lock.track_scope();
        let data = self.data.try_lock()?;
        Some(TrackedGuard {
            data,
            _track: track,
        })
    }

    pub fn ordered_lock(&self) -> &OrderedLock {
        &self.lock
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Field order matters: the data guard drops before the track guard
pub struct TrackedGuard<'a, T> {
    data: MutexGuard<'a, T>,
    _track: TrackGuard<'a>,
}

impl<T> Deref for TrackedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for TrackedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}
