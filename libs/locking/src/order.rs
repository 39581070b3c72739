//! Lock order classes
//!
//! When several locks are held at once they MUST be acquired in descending
//! order. A lock that never has another lock taken while it is held is order 1;
//! a lock that may hold order-1 locks is order 2, and so on. Use
//! [`depends_on`] to derive an order from the locks a class may hold.

/// Order for a lock that may hold locks of every order in `deps`
pub const fn depends_on(deps: &[u32]) -> u32 {
    let mut max = 0;
    let mut i = 0;
    while i < deps.len() {
        if deps[i] > max {
            max = deps[i];
        }
        i += 1;
    }
    max + 1
}

/// Nothing else is ever taken while holding these
pub const LEAF: u32 = depends_on(&[]);

/// Guards a SyncRequest awaiting its answer
pub const SYNC_REQUEST: u32 = depends_on(&[]);

/// Guards the correlator's table of unanswered requests
pub const PENDING_TABLE: u32 = depends_on(&[]);

/// Serializes whole-frame writes on one connection
pub const CONNECTION_SEND: u32 = depends_on(&[]);

/// Guards a connection's lifecycle (receive thread handle)
pub const CONNECTION_STATE: u32 = depends_on(&[CONNECTION_SEND]);
