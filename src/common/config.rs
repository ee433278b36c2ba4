/// Default number of distinct item locks tracked per object before escalation
pub const DEFAULT_MAX_ITEM_LOCKS: usize = 100;

/// Database lock key prefix
pub const DATABASE_LOCK_PREFIX: &str = "DBL";

/// Object lock key prefix
pub const OBJECT_LOCK_PREFIX: &str = "OBL";

/// Schema lock key prefix
pub const SCHEMA_LOCK_PREFIX: &str = "SCL";

/// Data lock key prefix
pub const DATA_LOCK_PREFIX: &str = "DL";

/// Tunables for a [`DatabaseLockManager`](crate::manager::DatabaseLockManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockManagerConfig {
    /// Escalation threshold used when a caller does not supply one
    pub max_item_locks: usize,
}

impl LockManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_item_locks(mut self, max_item_locks: usize) -> Self {
        self.max_item_locks = max_item_locks;
        self
    }
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            max_item_locks: DEFAULT_MAX_ITEM_LOCKS,
        }
    }
}
