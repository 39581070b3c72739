//! Lock Registry - per-thread lock stacks and order validation
//!
//! ## Purpose
//!
//! Every thread that acquires or tracks an [`crate::OrderedLock`] owns a stack of
//! the records it currently holds, most recent last. Before a record is pushed the
//! registry compares its order against the record on top of the stack: orders must
//! strictly descend, except for same-order siblings that share a peer authority the
//! thread already holds. Releases must happen in reverse order.
//!
//! Violations are reported (once per distinct signature) but never fail the
//! operation: the checker exists to find deadlocks at the first occurrence, not to
//! cause them.
//!
//! ## Architecture Role
//!
//! ```text
//! OrderedLock::acquire ──► track ──┐
//! Tracked<T>::lock ───────► track ─┼─► LockRegistry ──► DeadlockReport
//! OrderedLock::check ─────► check ─┘        │             ├─► tracing error!
//!                                           │             ├─► side file
//!                                   thread lifecycle      └─► reporter callback
//! ```

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::report::{current_thread_label, DeadlockReport, ReportKind};

type Reporter = Arc<dyn Fn(&DeadlockReport) + Send + Sync>;
pub(crate) type StreamCloser = Box<dyn Fn() + Send + Sync>;

static GLOBAL: Lazy<LockRegistry> = Lazy::new(|| LockRegistry::new(RegistrySettings::default()));

/// Where deadlock reports go besides `tracing`
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySettings {
    pub deadlock_log: Option<PathBuf>,
    pub report_to_stderr: bool,
}

impl RegistrySettings {
    /// Reports only through tracing and the reporter callback
    pub fn quiet() -> Self {
        Self {
            deadlock_log: None,
            report_to_stderr: false,
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from(&config::LockingConfig::default())
    }
}

impl From<&config::LockingConfig> for RegistrySettings {
    fn from(config: &config::LockingConfig) -> Self {
        Self {
            // An empty path disables the side file
            deadlock_log: config
                .deadlock_log
                .clone()
                .filter(|path| !path.as_os_str().is_empty()),
            report_to_stderr: config.report_to_stderr,
        }
    }
}

/// Mutable part of a lock record, guarded by the record's own mutex
#[derive(Debug, Default)]
pub(crate) struct LockState {
    pub(crate) hold_count: u32,
    pub(crate) wait_count: u32,
    pub(crate) owner: Option<ThreadId>,
    pub(crate) owner_name: Option<String>,
}

/// One named lock. Lives as long as the longest of its lock handle and any
/// thread stack still referencing it.
pub(crate) struct LockRecord {
    pub(crate) name: String,
    pub(crate) order: u32,
    pub(crate) state: Mutex<LockState>,
    pub(crate) released: Condvar,
    peer_authority: RwLock<Option<Arc<LockRecord>>>,
    stream_closer: Option<StreamCloser>,
}

impl LockRecord {
    pub(crate) fn new(name: &str, order: u32, stream_closer: Option<StreamCloser>) -> Self {
        Self {
            name: format!("{}[{}]", name, order),
            order,
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
            peer_authority: RwLock::new(None),
            stream_closer,
        }
    }

    pub(crate) fn peer_authority(&self) -> Option<Arc<LockRecord>> {
        self.peer_authority.read().clone()
    }

    pub(crate) fn set_peer_authority(&self, parent: Option<Arc<LockRecord>>) {
        *self.peer_authority.write() = parent;
    }

    /// Must not be called while this record's state mutex is held
    pub(crate) fn describe(&self) -> String {
        let state = self.state.lock();
        format!(
            "Name [order] = {}, lock count = {}, wait count = {}, owner = {}",
            self.name,
            state.hold_count,
            state.wait_count,
            state.owner_name.as_deref().unwrap_or("none")
        )
    }

    /// [`LockRecord::describe`] plus one thread's track depth
    pub(crate) fn describe_tracked(&self, track_count: u32) -> String {
        let state = self.state.lock();
        format!(
            "Name [order] = {}, lock count = {}, wait count = {}, track count = {}, owner = {}",
            self.name,
            state.hold_count,
            state.wait_count,
            track_count,
            state.owner_name.as_deref().unwrap_or("none")
        )
    }
}

struct StackEntry {
    record: Arc<LockRecord>,
    /// Reentrant track depth on this thread
    depth: u32,
    since: Instant,
}

/// A record removed by force after an order violation. Later untracks of it are
/// absorbed silently instead of being reported as unbalanced.
struct Evicted {
    record: Arc<LockRecord>,
    remaining: u32,
}

enum ReleaseOutcome {
    Released,
    OutOfOrder { latest: String },
    NotTracked,
}

struct ThreadLockStack {
    thread_name: String,
    entries: Vec<StackEntry>,
    evicted: Vec<Evicted>,
    /// Set by `thread_started`; unregistered stacks are dropped once empty
    registered: bool,
}

impl ThreadLockStack {
    fn new(thread_name: String) -> Self {
        Self {
            thread_name,
            entries: Vec::new(),
            evicted: Vec::new(),
            registered: false,
        }
    }

    fn is_disposable(&self) -> bool {
        !self.registered && self.entries.is_empty() && self.evicted.is_empty()
    }

    fn position(&self, record: &Arc<LockRecord>) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|entry| Arc::ptr_eq(&entry.record, record))
    }

    /// The record on top of the stack if pushing `record` would break the order
    fn find_violation(&self, record: &LockRecord) -> Option<Arc<LockRecord>> {
        let top = self.entries.last()?;
        if top.record.order > record.order {
            return None;
        }
        if top.record.order == record.order && self.shares_held_authority(&top.record, record) {
            return None;
        }
        Some(Arc::clone(&top.record))
    }

    fn shares_held_authority(&self, a: &LockRecord, b: &LockRecord) -> bool {
        let (Some(parent_a), Some(parent_b)) = (a.peer_authority(), b.peer_authority()) else {
            return false;
        };
        Arc::ptr_eq(&parent_a, &parent_b)
            && self
                .entries
                .iter()
                .any(|entry| Arc::ptr_eq(&entry.record, &parent_a))
    }

    fn evict_top(&mut self) {
        if let Some(entry) = self.entries.pop() {
            self.evicted.push(Evicted {
                record: entry.record,
                remaining: entry.depth,
            });
        }
    }

    fn release(&mut self, record: &Arc<LockRecord>) -> ReleaseOutcome {
        if let Some(pos) = self.position(record) {
            if self.entries[pos].depth > 1 {
                self.entries[pos].depth -= 1;
                return ReleaseOutcome::Released;
            }
            let was_top = pos + 1 == self.entries.len();
            let latest = self
                .entries
                .last()
                .map(|entry| entry.record.name.clone())
                .unwrap_or_default();
            self.entries.remove(pos);
            if was_top {
                ReleaseOutcome::Released
            } else {
                ReleaseOutcome::OutOfOrder { latest }
            }
        } else if let Some(pos) = self
            .evicted
            .iter()
            .position(|evicted| Arc::ptr_eq(&evicted.record, record))
        {
            self.evicted[pos].remaining -= 1;
            if self.evicted[pos].remaining == 0 {
                self.evicted.remove(pos);
            }
            ReleaseOutcome::Released
        } else {
            ReleaseOutcome::NotTracked
        }
    }
}

struct RegistryInner {
    stacks: DashMap<ThreadId, ThreadLockStack>,
    reported: Mutex<HashSet<u32>>,
    settings: RwLock<RegistrySettings>,
    reporter: RwLock<Option<Reporter>>,
}

/// Global table of per-thread lock stacks
///
/// Cloning is cheap; clones share the same table. Most code uses
/// [`LockRegistry::global`]; tests build private registries so their reports
/// do not mix.
#[derive(Clone)]
pub struct LockRegistry {
    inner: Arc<RegistryInner>,
}

impl LockRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                stacks: DashMap::new(),
                reported: Mutex::new(HashSet::new()),
                settings: RwLock::new(settings),
                reporter: RwLock::new(None),
            }),
        }
    }

    /// Process-wide registry used by [`crate::OrderedLock::new`]
    pub fn global() -> LockRegistry {
        GLOBAL.clone()
    }

    /// Replace where reports are written
    pub fn configure(&self, settings: RegistrySettings) {
        *self.inner.settings.write() = settings;
    }

    /// Observe every report that survives deduplication
    pub fn set_reporter(&self, reporter: impl Fn(&DeadlockReport) + Send + Sync + 'static) {
        *self.inner.reporter.write() = Some(Arc::new(reporter));
    }

    pub fn clear_reporter(&self) {
        *self.inner.reporter.write() = None;
    }

    /// Number of distinct signatures reported so far
    pub fn reported_count(&self) -> usize {
        self.inner.reported.lock().len()
    }

    fn stack_for_current(&self) -> RefMut<'_, ThreadId, ThreadLockStack> {
        self.inner
            .stacks
            .entry(thread::current().id())
            .or_insert_with(|| ThreadLockStack::new(current_thread_label()))
    }

    pub(crate) fn track(&self, record: &Arc<LockRecord>) {
        let violation = {
            let mut stack = self.stack_for_current();
            if let Some(pos) = stack.position(record) {
                stack.entries[pos].depth += 1;
                return;
            }
            let violation = stack.find_violation(record);
            if violation.is_some() {
                // Force-untrack the offender so a single missed release
                // does not produce a cascade of reports
                stack.evict_top();
            }
            stack.entries.push(StackEntry {
                record: Arc::clone(record),
                depth: 1,
                since: Instant::now(),
            });
            violation
        };

        if let Some(offender) = violation {
            let reason = format!(
                "order violation: object {} locked, while attempting to lock object {}.\nObject will be unlocked manually.",
                offender.name, record.name
            );
            self.report(
                ReportKind::OrderViolation,
                reason,
                record.describe(),
                &[&offender.name, &record.name],
            );
        }
    }

    pub(crate) fn untrack(&self, record: &Arc<LockRecord>) {
        let thread_id = thread::current().id();
        let outcome = match self.inner.stacks.get_mut(&thread_id) {
            Some(mut stack) => stack.release(record),
            None => ReleaseOutcome::NotTracked,
        };
        // Threads not started through the lifecycle hooks leave no entry behind
        self.inner
            .stacks
            .remove_if(&thread_id, |_, stack| stack.is_disposable());

        match outcome {
            ReleaseOutcome::Released => {}
            ReleaseOutcome::OutOfOrder { latest } => {
                let reason = format!(
                    "Objects not unlocked in the reverse of the lock order. Object {} is being unlocked, while object {} was most recently locked.",
                    record.name, latest
                );
                self.report(
                    ReportKind::OutOfOrderRelease,
                    reason,
                    record.describe(),
                    &[&record.name, &latest],
                );
            }
            ReleaseOutcome::NotTracked => {
                let reason = format!("Object {} unlocked that was not previously locked.", record.name);
                self.report(
                    ReportKind::UnbalancedRelease,
                    reason,
                    record.describe(),
                    &[&record.name],
                );
            }
        }
    }

    /// Dry-run of `track`: reports and returns true if tracking `record` now
    /// would violate the order. Shared state is left untouched.
    pub(crate) fn check(&self, record: &Arc<LockRecord>) -> bool {
        let violation = match self.inner.stacks.get(&thread::current().id()) {
            Some(stack) if stack.position(record).is_none() => stack.find_violation(record),
            _ => None,
        };

        match violation {
            Some(offender) => {
                let reason = format!(
                    "order violation: object {} locked, while attempting to lock object {}.",
                    offender.name, record.name
                );
                self.report(
                    ReportKind::OrderViolation,
                    reason,
                    record.describe(),
                    &[&offender.name, &record.name],
                );
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_tracked(&self, record: &Arc<LockRecord>) -> bool {
        self.inner
            .stacks
            .get(&thread::current().id())
            .map(|stack| stack.position(record).is_some())
            .unwrap_or(false)
    }

    /// Names of the locks the calling thread currently tracks, oldest first
    pub fn tracked_by_current(&self) -> Vec<String> {
        self.inner
            .stacks
            .get(&thread::current().id())
            .map(|stack| {
                stack
                    .entries
                    .iter()
                    .map(|entry| entry.record.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total track depth of `record` across every thread
    pub(crate) fn track_count(&self, record: &Arc<LockRecord>) -> u32 {
        self.inner
            .stacks
            .iter()
            .flat_map(|stack| {
                stack
                    .entries
                    .iter()
                    .filter(|entry| Arc::ptr_eq(&entry.record, record))
                    .map(|entry| entry.depth)
                    .collect::<Vec<_>>()
            })
            .sum()
    }

    /// Register the calling thread so it shows up in [`LockRegistry::dump`]
    /// until [`LockRegistry::thread_exiting`]. Returns false if it was already
    /// registered.
    pub fn thread_started(&self) -> bool {
        let mut stack = self
            .inner
            .stacks
            .entry(thread::current().id())
            .or_insert_with(|| ThreadLockStack::new(current_thread_label()));
        !std::mem::replace(&mut stack.registered, true)
    }

    /// Deregister the calling thread, reporting a leak if it still tracks locks.
    /// Returns false if the thread was not registered.
    pub fn thread_exiting(&self) -> bool {
        let Some((_, stack)) = self.inner.stacks.remove(&thread::current().id()) else {
            return false;
        };
        if !stack.entries.is_empty() {
            let names: Vec<&str> = stack
                .entries
                .iter()
                .map(|entry| entry.record.name.as_str())
                .collect();
            let reason = format!(
                "Thread {} dying before all its object locks have been released: {:?}",
                stack.thread_name, names
            );
            self.report(ReportKind::Leak, reason, names.join(", "), &names);
        }
        true
    }

    /// One block per known thread listing every record it tracks, sorted by thread name
    pub fn dump(&self) -> Vec<String> {
        let snapshot: Vec<(String, Vec<(Arc<LockRecord>, u32)>)> = self
            .inner
            .stacks
            .iter()
            .map(|stack| {
                let records = stack
                    .entries
                    .iter()
                    .map(|entry| (Arc::clone(&entry.record), entry.depth))
                    .collect();
                (stack.thread_name.clone(), records)
            })
            .collect();

        let mut blocks: Vec<(String, String)> = snapshot
            .into_iter()
            .map(|(thread_name, records)| {
                let mut block = format!("Thread {} has {} locks:", thread_name, records.len());
                for (record, depth) in &records {
                    block.push_str("\n    ");
                    block.push_str(&record.describe_tracked(*depth));
                }
                (thread_name, block)
            })
            .collect();
        blocks.sort_by(|a, b| a.0.cmp(&b.0));
        blocks.into_iter().map(|(_, block)| block).collect()
    }

    /// Close the stream whose lock has been held longest, if that exceeds `allowance`
    ///
    /// Only locks created with a stream closer are considered. Returns true when
    /// a stream was closed.
    pub fn close_longest_stalled(&self, allowance: Duration) -> bool {
        let mut candidates: Vec<(Duration, String, Arc<LockRecord>)> = Vec::new();
        for stack in self.inner.stacks.iter() {
            for entry in &stack.entries {
                if entry.record.stream_closer.is_some() {
                    candidates.push((
                        entry.since.elapsed(),
                        stack.thread_name.clone(),
                        Arc::clone(&entry.record),
                    ));
                }
            }
        }

        for (held, thread_name, record) in &candidates {
            debug!(
                thread = %thread_name,
                lock = %record.name,
                held_ms = held.as_millis() as u64,
                "Thread holds a stream lock"
            );
        }

        let Some((held, thread_name, record)) =
            candidates.into_iter().max_by_key(|(held, _, _)| *held)
        else {
            return false;
        };

        if held <= allowance {
            debug!(
                lock = %record.name,
                held_ms = held.as_millis() as u64,
                allowance_ms = allowance.as_millis() as u64,
                "Longest stream lock still within allowance"
            );
            return false;
        }

        error!(
            thread = %thread_name,
            lock = %record.name,
            held_ms = held.as_millis() as u64,
            "Closing stream held past its allowance"
        );
        if let Some(closer) = &record.stream_closer {
            closer();
        }
        true
    }

    pub(crate) fn report(&self, kind: ReportKind, reason: String, lock: String, involved: &[&str]) {
        let report = DeadlockReport::capture(kind, reason, lock, involved);

        if !self.inner.reported.lock().insert(report.signature) {
            debug!(signature = report.signature, "Deadlock report already issued, suppressing");
            return;
        }

        error!(
            kind = report.kind.as_str(),
            thread = %report.thread,
            signature = report.signature,
            "Possible deadlock condition found: {}",
            report.reason
        );

        let settings = self.inner.settings.read().clone();
        if settings.report_to_stderr {
            eprintln!("{}", report);
        }
        if let Some(path) = &settings.deadlock_log {
            if let Err(e) = report.append_to(path) {
                warn!("Failed to append deadlock report to {:?}: {}", path, e);
            }
        }

        let reporter = self.inner.reporter.read().clone();
        if let Some(reporter) = reporter {
            reporter(&report);
        }
        info!(signature = report.signature, "Deadlock report recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, order: u32) -> Arc<LockRecord> {
        Arc::new(LockRecord::new(name, order, None))
    }

    #[test]
    fn test_descending_track_is_clean() {
        let registry = LockRegistry::new(RegistrySettings::quiet());
        let (a, b) = (record("A", 3), record("B", 2));

        registry.track(&a);
        registry.track(&b);
        assert_eq!(registry.tracked_by_current(), vec!["A[3]", "B[2]"]);
        registry.untrack(&b);
        registry.untrack(&a);

        assert_eq!(registry.reported_count(), 0);
        assert!(registry.tracked_by_current().is_empty());
    }

    #[test]
    fn test_violation_evicts_offender() {
        let registry = LockRegistry::new(RegistrySettings::quiet());
        let (low, high) = (record("Low", 1), record("High", 2));

        registry.track(&low);
        registry.track(&high);
        assert_eq!(registry.reported_count(), 1);
        assert_eq!(registry.tracked_by_current(), vec!["High[2]"]);

        // The evicted record's own release is absorbed without another report
        registry.untrack(&high);
        registry.untrack(&low);
        assert_eq!(registry.reported_count(), 1);
    }

    #[test]
    fn test_reentrant_track_counts_depth() {
        let registry = LockRegistry::new(RegistrySettings::quiet());
        let a = record("A", 1);

        registry.track(&a);
        registry.track(&a);
        registry.untrack(&a);
        assert!(registry.is_tracked(&a));
        registry.untrack(&a);
        assert!(!registry.is_tracked(&a));
        assert_eq!(registry.reported_count(), 0);
    }

    #[test]
    fn test_untrack_without_track_is_reported() {
        let registry = LockRegistry::new(RegistrySettings::quiet());
        registry.untrack(&record("Ghost", 1));
        assert_eq!(registry.reported_count(), 1);
    }

    #[test]
    fn test_thread_registration() {
        let registry = LockRegistry::new(RegistrySettings::quiet());
        assert!(registry.thread_started());
        assert!(!registry.thread_started());
        assert!(registry.thread_exiting());
        assert!(!registry.thread_exiting());
    }

    #[test]
    fn test_unregistered_thread_leaves_no_stack() {
        let registry = LockRegistry::new(RegistrySettings::quiet());
        let a = record("A", 1);

        registry.track(&a);
        registry.track(&a);
        assert_eq!(registry.track_count(&a), 2);
        registry.untrack(&a);
        assert_eq!(registry.dump().len(), 1);
        registry.untrack(&a);
        assert!(registry.dump().is_empty());
        assert_eq!(registry.track_count(&a), 0);

        // Registered threads stay listed with an empty stack
        registry.thread_started();
        registry.track(&a);
        registry.untrack(&a);
        assert_eq!(registry.dump().len(), 1);
        assert!(registry.thread_exiting());
    }

    #[test]
    fn test_empty_log_path_disables_side_file() {
        let config = config::LockingConfig {
            deadlock_log: Some(PathBuf::new()),
            report_to_stderr: false,
        };
        assert_eq!(RegistrySettings::from(&config), RegistrySettings::quiet());
    }
}
