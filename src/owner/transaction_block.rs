use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{LockError, ObjectId, Result, TransactionId};
use crate::lock::{DatabaseLock, DatabaseLockMode, ObjectLockMode, SchemaLock, SchemaLockMode};
use crate::manager::LockHierarchy;

use super::DataLockOwnerBlock;

struct TransactionLocks {
    database: Option<Arc<DatabaseLock>>,
    schemas: HashMap<ObjectId, Arc<SchemaLock>>,
    data_blocks: HashMap<ObjectId, Arc<DataLockOwnerBlock>>,
    released: bool,
}

impl TransactionLocks {
    fn ensure_active(&self, transaction: TransactionId) -> Result<()> {
        if self.released {
            return Err(LockError::InvalidOwnerState(format!(
                "locks of {} already released",
                transaction
            )));
        }
        Ok(())
    }
}

/// Every lock one transaction holds in one database.
///
/// Object locks live in the per-object [`DataLockOwnerBlock`], which also
/// holds the intents of the object's item locks. Each lock kept here carries
/// one reference owned by the block. All of them are released together by
/// [`release_all`](TransactionLockOwnerBlock::release_all) when the
/// transaction commits or rolls back.
pub struct TransactionLockOwnerBlock {
    transaction: TransactionId,
    /// Escalation threshold for blocks created by object locks
    max_item_locks: usize,
    hierarchy: Arc<LockHierarchy>,
    state: Mutex<TransactionLocks>,
}

impl TransactionLockOwnerBlock {
    pub(crate) fn new(
        hierarchy: Arc<LockHierarchy>,
        transaction: TransactionId,
        max_item_locks: usize,
    ) -> Self {
        Self {
            transaction,
            max_item_locks,
            hierarchy,
            state: Mutex::new(TransactionLocks {
                database: None,
                schemas: HashMap::new(),
                data_blocks: HashMap::new(),
                released: false,
            }),
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction
    }

    /// Returns the item-lock block for `object_id`, creating it if absent.
    ///
    /// `max_item_locks` only applies to a newly created block.
    pub fn get_or_create_data_lock_owner_block(
        &self,
        object_id: ObjectId,
        max_item_locks: usize,
    ) -> Result<Arc<DataLockOwnerBlock>> {
        let mut state = self.state.lock();
        state.ensure_active(self.transaction)?;

        if let Some(block) = state.data_blocks.get(&object_id) {
            return Ok(Arc::clone(block));
        }

        let block = Arc::new(DataLockOwnerBlock::new(
            Arc::clone(&self.hierarchy),
            self.transaction,
            object_id,
            max_item_locks,
        )?);
        state.data_blocks.insert(object_id, Arc::clone(&block));
        debug!(
            txn = %self.transaction,
            object = %object_id,
            max_item_locks,
            "Created owner block"
        );
        Ok(block)
    }

    /// Returns the existing item-lock block for `object_id`.
    pub fn data_lock_owner_block(&self, object_id: ObjectId) -> Result<Arc<DataLockOwnerBlock>> {
        let state = self.state.lock();
        state.ensure_active(self.transaction)?;
        state.data_blocks.get(&object_id).cloned().ok_or_else(|| {
            LockError::InvalidOwnerState(format!(
                "no owner block for {} in {}",
                object_id, self.transaction
            ))
        })
    }

    /// Locks the database on behalf of this transaction.
    pub fn lock_database(&self, mode: DatabaseLockMode, timeout: Duration) -> Result<()> {
        let existing = {
            let state = self.state.lock();
            state.ensure_active(self.transaction)?;
            state.database.clone()
        };

        let (lock, is_new) = match existing {
            Some(lock) => (lock, false),
            None => (self.hierarchy.database_lock()?, true),
        };
        if let Err(e) = lock.lock(self.transaction, mode, timeout) {
            if is_new {
                lock.release_ref()?;
            }
            return Err(e);
        }

        if is_new {
            let mut state = self.state.lock();
            if state.database.is_some() {
                lock.release_ref()?;
            } else {
                state.database = Some(lock);
            }
        }
        Ok(())
    }

    /// Locks the object itself on behalf of this transaction.
    pub fn lock_object(
        &self,
        object_id: ObjectId,
        mode: ObjectLockMode,
        timeout: Duration,
    ) -> Result<()> {
        self.get_or_create_data_lock_owner_block(object_id, self.max_item_locks)?
            .lock_owner(mode, timeout)
    }

    /// Releases (`ObjectLockMode::None`) or downgrades an object lock taken
    /// with [`lock_object`](Self::lock_object). Intents still needed by the
    /// object's item locks stay held.
    pub fn unlock_object(&self, object_id: ObjectId, mode: ObjectLockMode) -> Result<()> {
        let block = {
            let state = self.state.lock();
            state.ensure_active(self.transaction)?;
            state.data_blocks.get(&object_id).cloned()
        };
        match block {
            Some(block) => block.unlock_owner(mode),
            None => {
                warn!(txn = %self.transaction, object = %object_id, "Object lock not held");
                Ok(())
            }
        }
    }

    pub fn has_object_lock(&self, object_id: ObjectId, mode: ObjectLockMode) -> Result<bool> {
        let block = {
            let state = self.state.lock();
            state.ensure_active(self.transaction)?;
            state.data_blocks.get(&object_id).cloned()
        };
        match block {
            Some(block) => block.has_owner_lock(mode),
            None => Ok(false),
        }
    }

    /// Locks the schema of an object on behalf of this transaction.
    pub fn lock_schema(
        &self,
        object_id: ObjectId,
        mode: SchemaLockMode,
        timeout: Duration,
    ) -> Result<()> {
        let existing = {
            let state = self.state.lock();
            state.ensure_active(self.transaction)?;
            state.schemas.get(&object_id).cloned()
        };

        let (lock, is_new) = match existing {
            Some(lock) => (lock, false),
            None => (self.hierarchy.schema_lock(object_id)?, true),
        };
        if let Err(e) = lock.lock(self.transaction, mode, timeout) {
            if is_new {
                lock.release_ref()?;
            }
            return Err(e);
        }

        if is_new {
            let mut state = self.state.lock();
            if state.schemas.contains_key(&object_id) {
                lock.release_ref()?;
            } else {
                state.schemas.insert(object_id, lock);
            }
        }
        Ok(())
    }

    /// Releases the schema lock of an object.
    pub fn unlock_schema(&self, object_id: ObjectId) -> Result<()> {
        let lock = {
            let mut state = self.state.lock();
            state.ensure_active(self.transaction)?;
            state.schemas.remove(&object_id)
        };

        match lock {
            Some(lock) => {
                lock.unlock(self.transaction, SchemaLockMode::None)?;
                lock.release_ref()
            }
            None => {
                warn!(txn = %self.transaction, object = %object_id, "Schema lock not held");
                Ok(())
            }
        }
    }

    pub fn has_schema_lock(&self, object_id: ObjectId, mode: SchemaLockMode) -> Result<bool> {
        let lock = {
            let state = self.state.lock();
            state.ensure_active(self.transaction)?;
            state.schemas.get(&object_id).cloned()
        };
        match lock {
            Some(lock) => lock.has_lock(self.transaction, mode),
            None => Ok(false),
        }
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Releases every lock of the transaction from finest to coarsest: item
    /// locks, then schema locks, then object locks, then the database lock.
    ///
    /// All locks are released even if one release fails; the first error is
    /// returned. A second call is an `InvalidOwnerState` error.
    pub fn release_all(&self) -> Result<()> {
        let (data_blocks, schemas, database) = {
            let mut state = self.state.lock();
            state.ensure_active(self.transaction)?;
            state.released = true;
            (
                mem::take(&mut state.data_blocks),
                mem::take(&mut state.schemas),
                state.database.take(),
            )
        };

        let mut first_error = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                warn!(txn = %self.transaction, error = %e, "Lock release failed");
                first_error.get_or_insert(e);
            }
        };

        for block in data_blocks.values() {
            record(block.release_item_locks());
        }
        for lock in schemas.into_values() {
            record(
                lock.unlock(self.transaction, SchemaLockMode::None)
                    .and_then(|_| lock.release_ref()),
            );
        }
        for block in data_blocks.into_values() {
            record(block.release_locks());
        }
        if let Some(lock) = database {
            record(
                lock.unlock(self.transaction, DatabaseLockMode::None)
                    .and_then(|_| lock.release_ref()),
            );
        }

        debug!(txn = %self.transaction, "Released transaction locks");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for TransactionLockOwnerBlock {
    fn drop(&mut self) {
        if self.state.get_mut().released {
            return;
        }
        warn!(txn = %self.transaction, "Transaction locks dropped without release");
        if let Err(e) = self.release_all() {
            warn!(txn = %self.transaction, error = %e, "Releasing dropped transaction locks failed");
        }
    }
}
