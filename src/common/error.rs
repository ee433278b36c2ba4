use std::time::Duration;

use thiserror::Error;

/// Lock manager error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock timeout on {resource} after {timeout:?}")]
    LockTimeout { resource: String, timeout: Duration },

    #[error("Invalid owner state: {0}")]
    InvalidOwnerState(String),

    #[error("Invalid lock identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Lock mode {requested} on {resource} is not a downgrade of {held}")]
    InvalidLockMode {
        resource: String,
        held: String,
        requested: String,
    },
}

impl LockError {
    /// Returns true if this error is a lock timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::LockTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
