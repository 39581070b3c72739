//! Fatal-condition hook
//!
//! Protocol and programming defects (unknown wire tag, registry collisions,
//! release by a non-owner, duplicate request options) are logged at `error!`
//! and handed to an optional process-wide hook. Tests install a hook to count
//! them; applications can use it to break into a debugger or abort.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::error;

type FatalHook = Arc<dyn Fn(&str) + Send + Sync>;

static FATAL_HOOK: Lazy<RwLock<Option<FatalHook>>> = Lazy::new(|| RwLock::new(None));

/// Install the hook invoked for every fatal condition, replacing any previous one
pub fn set_fatal_hook(hook: impl Fn(&str) + Send + Sync + 'static) {
    *FATAL_HOOK.write() = Some(Arc::new(hook));
}

pub fn clear_fatal_hook() {
    *FATAL_HOOK.write() = None;
}

/// Report a fatal condition. The caller still has to abort its operation.
pub fn fatal(message: &str) {
    error!(target: "lockstep::fatal", "{}", message);
    // Clone out so the hook may itself install or clear hooks
    let hook = FATAL_HOOK.read().clone();
    if let Some(hook) = hook {
        hook(message);
    }
}
