//! Deadlock reports
//!
//! A report is raised for every lock-order violation, out-of-order release and
//! leaked lock. Reports are deduplicated by a signature computed from the kind,
//! the lock names involved and the captured call stack, so a violation that
//! fires on every pass through a loop is written once.

use std::backtrace::Backtrace;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

/// What kind of condition was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// A lock of equal or higher order was acquired while a lower one was held
    OrderViolation,
    /// A tracked lock was released while a more recent one was still held
    OutOfOrderRelease,
    /// Untrack of a lock this thread never tracked
    UnbalancedRelease,
    /// A lock was dropped while held, or a thread exited still holding locks
    Leak,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::OrderViolation => "order_violation",
            ReportKind::OutOfOrderRelease => "out_of_order_release",
            ReportKind::UnbalancedRelease => "unbalanced_release",
            ReportKind::Leak => "leak",
        }
    }
}

/// One distinct deadlock-risk observation
#[derive(Debug, Clone)]
pub struct DeadlockReport {
    pub kind: ReportKind,
    pub reason: String,
    /// Snapshot of the lock the report is about (`name[order]` plus counts)
    pub lock: String,
    pub thread: String,
    pub signature: u32,
    pub backtrace: String,
    pub timestamp: SystemTime,
}

impl DeadlockReport {
    pub(crate) fn capture(kind: ReportKind, reason: String, lock: String, involved: &[&str]) -> Self {
        let backtrace = Backtrace::force_capture().to_string();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        for name in involved {
            hasher.update(name.as_bytes());
        }
        hasher.update(backtrace.as_bytes());

        Self {
            kind,
            reason,
            lock,
            thread: current_thread_label(),
            signature: hasher.finalize(),
            backtrace,
            timestamp: SystemTime::now(),
        }
    }

    /// Append this report to the side file, creating parent directories as needed
    pub(crate) fn append_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file)?;
        writeln!(file, "{}", self)?;
        writeln!(file, "{}", self.lock)?;
        writeln!(file, "{}", self.backtrace)?;
        Ok(())
    }
}

impl fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        write!(
            f,
            "[{}] Possible deadlock condition found ({}) in thread {}: {}",
            secs,
            self.kind.as_str(),
            self.thread,
            self.reason
        )
    }
}

pub(crate) fn current_thread_label() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}
