use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::common::{
    LockError, LockManagerConfig, LogicalPageId, ObjectId, Result, SessionId, TransactionId,
};
use crate::lock::{
    DataLockMode, DatabaseLockMode, FinalReleaseListener, ObjectLockMode, SchemaLockMode,
};
use crate::owner::{DataLockOwnerBlock, TransactionLockOwnerBlock};

use super::{GlobalLockManager, LockHierarchy};

/// Number of live lock resources per kind, for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockCounts {
    pub databases: usize,
    pub objects: usize,
    pub schemas: usize,
    pub data: usize,
}

/// DatabaseLockManager is the lock facade for one open database.
///
/// It owns the object, schema and data-item registries of the database and
/// the live lock blocks of every transaction that touched it. A transaction's
/// locks stay held until [`release_transaction`] is called at commit or
/// rollback.
///
/// [`release_transaction`]: DatabaseLockManager::release_transaction
pub struct DatabaseLockManager {
    config: LockManagerConfig,
    hierarchy: Arc<LockHierarchy>,
    transactions: Mutex<HashMap<TransactionId, Arc<TransactionLockOwnerBlock>>>,
}

impl DatabaseLockManager {
    /// Creates a lock manager for database `name` with the default config.
    pub fn new(global: Arc<GlobalLockManager>, name: &str) -> Result<Self> {
        Self::with_config(global, name, LockManagerConfig::default())
    }

    pub fn with_config(
        global: Arc<GlobalLockManager>,
        name: &str,
        config: LockManagerConfig,
    ) -> Result<Self> {
        let hierarchy = Arc::new(LockHierarchy::new(global, name)?);
        info!(
            database = name,
            max_item_locks = config.max_item_locks,
            "Opened database lock manager"
        );
        Ok(Self {
            config,
            hierarchy,
            transactions: Mutex::new(HashMap::new()),
        })
    }

    pub fn database_name(&self) -> &str {
        self.hierarchy.database_name()
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    /// Locks this database on behalf of `session`.
    pub fn lock_database(
        &self,
        session: SessionId,
        mode: DatabaseLockMode,
        timeout: Duration,
    ) -> Result<()> {
        self.hierarchy
            .global()
            .lock_database(self.database_name(), session, mode, timeout)
    }

    /// Releases the session's lock on this database.
    pub fn unlock_database(&self, session: SessionId) -> Result<()> {
        self.hierarchy
            .global()
            .unlock_database(self.database_name(), session)
    }

    pub fn has_database_lock(&self, session: SessionId, mode: DatabaseLockMode) -> Result<bool> {
        self.hierarchy
            .global()
            .has_database_lock(self.database_name(), session, mode)
    }

    /// Returns the lock block of `transaction`, creating it if absent.
    pub fn transaction_locks(&self, transaction: TransactionId) -> Arc<TransactionLockOwnerBlock> {
        let mut transactions = self.transactions.lock();
        let block = transactions.entry(transaction).or_insert_with(|| {
            debug!(txn = %transaction, "Created transaction lock block");
            Arc::new(TransactionLockOwnerBlock::new(
                Arc::clone(&self.hierarchy),
                transaction,
                self.config.max_item_locks,
            ))
        });
        Arc::clone(block)
    }

    /// Returns the item-lock block of `transaction` on `object_id`, creating
    /// it with `max_item_locks` as escalation threshold if absent.
    pub fn get_or_create_data_owner_block(
        &self,
        transaction: TransactionId,
        object_id: ObjectId,
        max_item_locks: usize,
    ) -> Result<Arc<DataLockOwnerBlock>> {
        self.transaction_locks(transaction)
            .get_or_create_data_lock_owner_block(object_id, max_item_locks)
    }

    /// Returns the existing item-lock block of `transaction` on `object_id`.
    pub fn data_owner_block(
        &self,
        transaction: TransactionId,
        object_id: ObjectId,
    ) -> Result<Arc<DataLockOwnerBlock>> {
        self.existing_transaction(transaction)?
            .data_lock_owner_block(object_id)
    }

    /// Locks a data item, using the configured escalation threshold when the
    /// item-lock block does not exist yet.
    pub fn lock_item(
        &self,
        transaction: TransactionId,
        object_id: ObjectId,
        page_id: LogicalPageId,
        mode: DataLockMode,
        timeout: Duration,
    ) -> Result<()> {
        self.get_or_create_data_owner_block(transaction, object_id, self.config.max_item_locks)?
            .lock_item(page_id, mode, timeout)
    }

    pub fn lock_object(
        &self,
        transaction: TransactionId,
        object_id: ObjectId,
        mode: ObjectLockMode,
        timeout: Duration,
    ) -> Result<()> {
        self.transaction_locks(transaction)
            .lock_object(object_id, mode, timeout)
    }

    pub fn unlock_object(
        &self,
        transaction: TransactionId,
        object_id: ObjectId,
        mode: ObjectLockMode,
    ) -> Result<()> {
        self.existing_transaction(transaction)?
            .unlock_object(object_id, mode)
    }

    pub fn lock_schema(
        &self,
        transaction: TransactionId,
        object_id: ObjectId,
        mode: SchemaLockMode,
        timeout: Duration,
    ) -> Result<()> {
        self.transaction_locks(transaction)
            .lock_schema(object_id, mode, timeout)
    }

    pub fn unlock_schema(&self, transaction: TransactionId, object_id: ObjectId) -> Result<()> {
        self.existing_transaction(transaction)?
            .unlock_schema(object_id)
    }

    /// Releases every lock of `transaction` and forgets it. A transaction
    /// that never locked anything is a no-op.
    pub fn release_transaction(&self, transaction: TransactionId) -> Result<()> {
        let Some(block) = self.transactions.lock().remove(&transaction) else {
            debug!(txn = %transaction, "No locks to release");
            return Ok(());
        };
        block.release_all()
    }

    /// Returns the number of transactions with live lock blocks.
    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Returns the live resource counts of the whole hierarchy.
    pub fn lock_counts(&self) -> LockCounts {
        let (objects, schemas, data) = self.hierarchy.counts();
        LockCounts {
            databases: self.hierarchy.global().active_database_count(),
            objects,
            schemas,
            data,
        }
    }

    /// Attaches `listener` to every object, schema and data lock created
    /// from now on.
    pub fn add_listener(&self, listener: Arc<dyn FinalReleaseListener>) {
        self.hierarchy.add_listener(listener);
    }

    fn existing_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Arc<TransactionLockOwnerBlock>> {
        self.transactions
            .lock()
            .get(&transaction)
            .cloned()
            .ok_or_else(|| {
                LockError::InvalidOwnerState(format!("{} holds no locks", transaction))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    fn manager() -> DatabaseLockManager {
        DatabaseLockManager::new(Arc::new(GlobalLockManager::new()), "main").unwrap()
    }

    #[test]
    fn test_release_transaction_clears_hierarchy() {
        let manager = manager();
        let t1 = TransactionId::new(1);
        let object = ObjectId::new(7);

        manager
            .lock_schema(t1, object, SchemaLockMode::SchemaStability, SHORT)
            .unwrap();
        manager
            .lock_item(t1, object, LogicalPageId::new(1), DataLockMode::Exclusive, SHORT)
            .unwrap();

        let counts = manager.lock_counts();
        assert_eq!(counts.databases, 1);
        assert_eq!(counts.objects, 1);
        assert_eq!(counts.schemas, 1);
        assert_eq!(counts.data, 1);

        manager.release_transaction(t1).unwrap();
        assert_eq!(manager.lock_counts(), LockCounts::default());
        assert_eq!(manager.transaction_count(), 0);
    }

    #[test]
    fn test_missing_owner_block_is_invalid_state() {
        let manager = manager();
        let t1 = TransactionId::new(1);

        assert!(matches!(
            manager.data_owner_block(t1, ObjectId::new(1)),
            Err(LockError::InvalidOwnerState(_))
        ));

        manager.transaction_locks(t1);
        assert!(matches!(
            manager.data_owner_block(t1, ObjectId::new(1)),
            Err(LockError::InvalidOwnerState(_))
        ));
    }

    #[test]
    fn test_release_unknown_transaction_is_noop() {
        let manager = manager();
        manager.release_transaction(TransactionId::new(42)).unwrap();
    }

    #[test]
    fn test_invalid_database_name() {
        let result = DatabaseLockManager::new(Arc::new(GlobalLockManager::new()), "a:b");
        assert!(matches!(result, Err(LockError::InvalidIdentifier(_))));
    }
}
