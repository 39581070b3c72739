//! Multi-wait results queue and sync key allocation
//!
//! A thread waiting on several outstanding requests attaches one
//! [`ResultsQueue`] to each of them; every answered request is pushed onto the
//! queue so the waiter blocks once instead of once per request.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::messages::SyncRequest;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL_KEYS: Lazy<SyncKeyAllocator> = Lazy::new(SyncKeyAllocator::new);

/// Bounded queue of answered requests. Clones share the same queue.
#[derive(Clone)]
pub struct ResultsQueue {
    id: u64,
    tx: Sender<SyncRequest>,
    rx: Receiver<SyncRequest>,
}

impl ResultsQueue {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            rx,
        }
    }

    pub fn from_config(config: &config::CorrelationConfig) -> Self {
        Self::bounded(config.results_queue_capacity)
    }

    /// Identity shared by every clone of this queue
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Enqueue an answered request without blocking. Returns false when the
    /// queue is full and the request was dropped from it.
    pub fn push(&self, request: SyncRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(request)) => {
                warn!(
                    queue = self.id,
                    capacity = self.capacity(),
                    sync_key = request.sync_key(),
                    "Results queue full, dropping answered request"
                );
                false
            }
            Err(TrySendError::Disconnected(request)) => {
                warn!(
                    queue = self.id,
                    sync_key = request.sync_key(),
                    "Results queue closed, dropping answered request"
                );
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    /// Block until an answered request arrives
    pub fn recv(&self) -> Option<SyncRequest> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SyncRequest> {
        match self.rx.recv_timeout(timeout) {
            Ok(request) => Some(request),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<SyncRequest> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl fmt::Debug for ResultsQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultsQueue")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

impl PartialEq for ResultsQueue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Monotonic source of sync keys. Clones share the same counter.
#[derive(Debug, Clone)]
pub struct SyncKeyAllocator {
    next: Arc<AtomicI32>,
}

impl SyncKeyAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i32) -> Self {
        Self {
            next: Arc::new(AtomicI32::new(first)),
        }
    }

    /// Counter shared by every request built with [`SyncRequest::new`]
    pub fn global() -> SyncKeyAllocator {
        GLOBAL_KEYS.clone()
    }

    pub fn next(&self) -> i32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Key the next call to `next` will return
    pub fn peek(&self) -> i32 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for SyncKeyAllocator {
    fn default() -> Self {
        Self::new()
    }
}
