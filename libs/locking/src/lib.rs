//! # Lockstep Locking
//!
//! Reentrant ordered locks with total-order deadlock detection.
//!
//! Every named lock carries an order. A thread holding (or tracking) a lock of
//! order N may only take locks of lower order, unless two equal-order siblings
//! share a peer authority the thread already holds. Violations, out-of-order
//! releases and leaked locks produce a [`DeadlockReport`], written once per
//! distinct call-stack signature.
//!
//! ## Modules
//!
//! - [`lock`]: [`OrderedLock`] with RAII guards
//! - [`registry`]: per-thread lock stacks, lock dump, stalled-stream breaker
//! - [`tracked`]: [`Tracked<T>`] mutex validated by tracking
//! - [`thread`]: lifecycle hooks around spawned threads
//! - [`diag`]: fatal-condition hook shared with the codec and transport

pub mod diag;
pub mod error;
pub mod lock;
pub mod order;
pub mod registry;
pub mod report;
pub mod thread;
pub mod tracked;

pub use error::{LockError, Result};
pub use lock::{LockGuard, OrderedLock, TrackGuard};
pub use registry::{LockRegistry, RegistrySettings};
pub use report::{DeadlockReport, ReportKind};
pub use thread::{spawn_tracked, spawn_tracked_in};
pub use tracked::{Tracked, TrackedGuard};
