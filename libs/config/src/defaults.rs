//! Default values shared by the substrate crates
//!
//! Every field of [`crate::SubstrateConfig`] falls back to one of these when the
//! configuration file omits it.

/// Lock-order checker defaults
pub mod locking {
    /// Side file that receives one block per distinct deadlock report
    pub const DEADLOCK_LOG: &str = "logs/Deadlocks.log";

    /// Echo deadlock reports on stderr as well as through tracing
    pub const REPORT_TO_STDERR: bool = true;
}

/// Framed transport defaults
pub mod network {
    /// Largest accepted `[tag][body]` payload (16MB)
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Smallest legal payload: a bare 6-byte tag
    pub const MIN_FRAME_SIZE: usize = 6;

    pub const TCP_NODELAY: bool = true;

    pub const DUMP_FRAMES: bool = false;

    /// How long a send may hold the connection lock before the stall breaker may close it
    pub const STALL_ALLOWANCE_MS: u64 = 30_000;
}

/// Request correlation defaults
pub mod correlation {
    /// Zero waits forever for a reply
    pub const REQUEST_TIMEOUT_MS: u64 = 0;

    /// Bound of a multi-wait results queue
    pub const RESULTS_QUEUE_CAPACITY: usize = 64;
}
