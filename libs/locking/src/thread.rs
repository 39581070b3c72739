//! Thread lifecycle hooks
//!
//! Threads spawned through [`spawn_tracked`] register with a [`LockRegistry`]
//! on start and deregister on exit, panics included. Exiting with locks still
//! tracked is reported as a leak.

use std::io;
use std::thread::{self, JoinHandle};

use crate::registry::LockRegistry;

struct ExitHook {
    registry: LockRegistry,
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        self.registry.thread_exiting();
    }
}

/// Spawn a named thread registered with the global registry
pub fn spawn_tracked<F, T>(name: impl Into<String>, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_tracked_in(&LockRegistry::global(), name, f)
}

pub fn spawn_tracked_in<F, T>(
    registry: &LockRegistry,
    name: impl Into<String>,
    f: F,
) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let registry = registry.clone();
    thread::Builder::new().name(name.into()).spawn(move || {
        registry.thread_started();
        let _exit = ExitHook { registry };
        f()
    })
}
