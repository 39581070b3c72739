//! Periodic stalled-stream breaker
//!
//! Runs [`LockRegistry::close_longest_stalled`] on a timer so a sender blocked
//! in a write to an unresponsive peer has its socket closed and is released.

use config::NetworkConfig;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use locking::{spawn_tracked_in, LockRegistry};
use std::io;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Background breaker thread; dropping it stops the thread
pub struct StallWatchdog {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StallWatchdog {
    /// Check every `interval` for a stream lock held longer than `allowance`
    pub fn spawn(registry: &LockRegistry, allowance: Duration, interval: Duration) -> io::Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let locks = registry.clone();
        let handle = spawn_tracked_in(registry, "stall-watchdog", move || {
            info!(
                allowance_ms = allowance.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "Stall watchdog running"
            );
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if locks.close_longest_stalled(allowance) {
                            info!("Stall watchdog closed a stalled stream");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Stall watchdog stopped");
        })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Watchdog checking four times per configured allowance
    pub fn from_config(registry: &LockRegistry, config: &NetworkConfig) -> io::Result<Self> {
        let allowance = config.stall_allowance();
        let interval = (allowance / 4).max(Duration::from_millis(10));
        Self::spawn(registry, allowance, interval)
    }
}

impl Drop for StallWatchdog {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for StallWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StallWatchdog")
            .field("running", &self.handle.is_some())
            .finish()
    }
}
