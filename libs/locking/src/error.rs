//! Lock Error Types

use thiserror::Error;

/// Errors raised by [`crate::OrderedLock`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Release attempted by a thread that does not own the lock
    #[error("Lock {lock} released by thread {caller} but owned by {owner}")]
    NotOwner {
        lock: String,
        caller: String,
        owner: String,
    },
}

/// Result type alias for lock operations
pub type Result<T> = std::result::Result<T, LockError>;

impl LockError {
    pub fn not_owner(lock: impl Into<String>, caller: impl Into<String>, owner: Option<String>) -> Self {
        Self::NotOwner {
            lock: lock.into(),
            caller: caller.into(),
            owner: owner.unwrap_or_else(|| "nobody".to_string()),
        }
    }

    /// Fatal errors indicate a programming defect, never a runtime condition
    pub fn is_fatal(&self) -> bool {
        match self {
            LockError::NotOwner { .. } => true,
        }
    }

    /// Get error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            LockError::NotOwner { .. } => "not_owner",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_owner_message() {
        let err = LockError::not_owner("Connection[1]", "worker-2", None);
        assert!(err.is_fatal());
        assert_eq!(err.category(), "not_owner");
        assert_eq!(
            err.to_string(),
            "Lock Connection[1] released by thread worker-2 but owned by nobody"
        );
    }
}
