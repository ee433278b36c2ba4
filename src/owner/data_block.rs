use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::common::{LockError, LogicalPageId, ObjectId, Result, TransactionId};
use crate::lock::{DataLock, DataLockMode, LockMode, ObjectLock, ObjectLockMode};
use crate::manager::LockHierarchy;

/// An item lock held by the block, with the mode it was granted in
struct TrackedItem {
    lock: Arc<DataLock>,
    mode: DataLockMode,
}

struct OwnerBlockState {
    /// Item locks held at page granularity
    items: HashMap<LogicalPageId, TrackedItem>,
    /// Object mode held once the item locks were traded for one object lock
    escalated: Option<ObjectLockMode>,
    /// Intent mode held on the object on behalf of the tracked items
    intent: ObjectLockMode,
    /// Object mode requested directly through `lock_owner`
    explicit: ObjectLockMode,
    released: bool,
}

impl OwnerBlockState {
    /// The weakest object mode that still covers every reason the block
    /// holds the object.
    fn required_object_mode(&self) -> ObjectLockMode {
        self.intent
            .join(self.explicit)
            .join(self.escalated.unwrap_or(ObjectLockMode::None))
    }

    fn ensure_active(&self, object_id: ObjectId) -> Result<()> {
        if self.released {
            return Err(LockError::InvalidOwnerState(format!(
                "owner block for {} already released",
                object_id
            )));
        }
        Ok(())
    }
}

/// DataLockOwnerBlock tracks the data-item locks one transaction holds on one
/// object and escalates them to a single object lock once more than
/// `max_item_locks` distinct items are held.
///
/// The block is the only holder of its transaction's grant on the object:
/// item intents, escalation and explicit object locks all go through it, so
/// the grant never drops below what the tracked items need.
///
/// The block keeps one reference on the object lock for its whole life and
/// one reference on every tracked item lock. All of them are given back by
/// [`release_locks`](DataLockOwnerBlock::release_locks), or on drop.
pub struct DataLockOwnerBlock {
    transaction: TransactionId,
    object_id: ObjectId,
    max_item_locks: usize,
    hierarchy: Arc<LockHierarchy>,
    object_lock: Arc<ObjectLock>,
    state: Mutex<OwnerBlockState>,
}

impl DataLockOwnerBlock {
    pub(crate) fn new(
        hierarchy: Arc<LockHierarchy>,
        transaction: TransactionId,
        object_id: ObjectId,
        max_item_locks: usize,
    ) -> Result<Self> {
        let object_lock = hierarchy.object_lock(object_id)?;
        Ok(Self {
            transaction,
            object_id,
            max_item_locks,
            hierarchy,
            object_lock,
            state: Mutex::new(OwnerBlockState {
                items: HashMap::new(),
                escalated: None,
                intent: ObjectLockMode::None,
                explicit: ObjectLockMode::None,
                released: false,
            }),
        })
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn max_item_locks(&self) -> usize {
        self.max_item_locks
    }

    /// Locks the object itself on behalf of this transaction.
    ///
    /// Item locks are still taken individually afterwards; only escalation
    /// lets the object lock stand in for them.
    pub fn lock_owner(&self, mode: ObjectLockMode, timeout: Duration) -> Result<()> {
        self.state.lock().ensure_active(self.object_id)?;
        if mode.is_none() {
            return Ok(());
        }

        self.object_lock.lock(self.transaction, mode, timeout)?;

        let mut state = self.state.lock();
        state.explicit = state.explicit.join(mode);
        Ok(())
    }

    /// Releases (`ObjectLockMode::None`) or downgrades the object lock taken
    /// with [`lock_owner`](Self::lock_owner).
    ///
    /// The object grant is only lowered to what the tracked items and any
    /// escalation still need.
    pub fn unlock_owner(&self, mode: ObjectLockMode) -> Result<()> {
        let target = {
            let mut state = self.state.lock();
            state.ensure_active(self.object_id)?;

            if state.explicit.is_none() {
                warn!(
                    txn = %self.transaction,
                    object = %self.object_id,
                    "Object lock not held"
                );
                return Ok(());
            }
            if !state.explicit.covers(mode) {
                return Err(LockError::InvalidLockMode {
                    resource: self.object_lock.ident().to_string(),
                    held: state.explicit.to_string(),
                    requested: mode.to_string(),
                });
            }
            state.explicit = mode;
            state.required_object_mode()
        };

        if self.object_lock.held_mode(self.transaction) == target {
            return Ok(());
        }
        self.object_lock.unlock(self.transaction, target)
    }

    /// Locks a single data item, escalating to an object lock when the
    /// number of tracked items exceeds the threshold.
    ///
    /// The object intent is always acquired before the item lock. A failed
    /// escalation is logged and the block keeps its item locks.
    pub fn lock_item(
        &self,
        page_id: LogicalPageId,
        mode: DataLockMode,
        timeout: Duration,
    ) -> Result<()> {
        let (escalated, intent, existing) = {
            let state = self.state.lock();
            state.ensure_active(self.object_id)?;
            let existing = state
                .items
                .get(&page_id)
                .map(|item| (item.mode, Arc::clone(&item.lock)));
            (state.escalated, state.intent, existing)
        };

        if mode.is_none() {
            return Ok(());
        }

        if let Some(object_mode) = escalated {
            if object_mode.subsumes_item(mode) {
                return Ok(());
            }
            self.object_lock
                .lock(self.transaction, ObjectLockMode::Exclusive, timeout)?;
            self.state.lock().escalated = Some(ObjectLockMode::Exclusive);
            debug!(
                txn = %self.transaction,
                object = %self.object_id,
                "Escalated object lock strengthened to Exclusive"
            );
            return Ok(());
        }

        if let Some((held, _)) = &existing {
            if held.covers(mode) {
                return Ok(());
            }
        }

        let required = mode.required_intent();
        if !intent.covers(required) {
            self.object_lock.lock(self.transaction, required, timeout)?;
            let mut state = self.state.lock();
            state.intent = state.intent.join(required);
        }

        let (item_lock, is_new) = match existing {
            Some((_, lock)) => (lock, false),
            None => (self.hierarchy.data_lock(self.object_id, page_id)?, true),
        };

        if let Err(e) = item_lock.lock(self.transaction, mode, timeout) {
            if is_new {
                item_lock.release_ref()?;
            }
            return Err(e);
        }

        let tracked = {
            let mut state = self.state.lock();
            state
                .items
                .entry(page_id)
                .and_modify(|item| item.mode = item.mode.join(mode))
                .or_insert(TrackedItem {
                    lock: item_lock,
                    mode,
                });
            state.items.len()
        };
        trace!(
            txn = %self.transaction,
            object = %self.object_id,
            page = %page_id,
            %mode,
            tracked,
            "Item locked"
        );

        if tracked > self.max_item_locks {
            self.try_escalate(timeout);
        }
        Ok(())
    }

    /// Releases (`DataLockMode::None`) or downgrades an item lock.
    ///
    /// Item unlocks are ignored once the block has escalated: the object lock
    /// keeps covering the item until the block is released.
    pub fn unlock_item(&self, page_id: LogicalPageId, mode: DataLockMode) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_active(self.object_id)?;

        if state.escalated.is_some() {
            trace!(
                txn = %self.transaction,
                object = %self.object_id,
                page = %page_id,
                "Item unlock ignored while escalated"
            );
            return Ok(());
        }

        if mode.is_none() {
            let Some(item) = state.items.remove(&page_id) else {
                warn!(
                    txn = %self.transaction,
                    object = %self.object_id,
                    page = %page_id,
                    "Unlock of an item not held"
                );
                return Ok(());
            };
            drop(state);

            item.lock.unlock(self.transaction, DataLockMode::None)?;
            return item.lock.release_ref();
        }

        let Some(item) = state.items.get(&page_id) else {
            warn!(
                txn = %self.transaction,
                object = %self.object_id,
                page = %page_id,
                "Downgrade of an item not held"
            );
            return Ok(());
        };
        let lock = Arc::clone(&item.lock);
        drop(state);

        lock.unlock(self.transaction, mode)?;
        if let Some(item) = self.state.lock().items.get_mut(&page_id) {
            item.mode = mode;
        }
        Ok(())
    }

    /// Returns true if this transaction holds at least `mode` on the item,
    /// either directly or through an escalated object lock.
    pub fn has_item_lock(&self, page_id: LogicalPageId, mode: DataLockMode) -> Result<bool> {
        let state = self.state.lock();
        state.ensure_active(self.object_id)?;

        if mode.is_none() {
            return Ok(true);
        }
        if state
            .escalated
            .is_some_and(|object_mode| object_mode.subsumes_item(mode))
        {
            return Ok(true);
        }
        Ok(state
            .items
            .get(&page_id)
            .is_some_and(|item| item.mode.covers(mode)))
    }

    /// Returns true if this transaction holds at least `mode` on the object.
    pub fn has_owner_lock(&self, mode: ObjectLockMode) -> Result<bool> {
        self.state.lock().ensure_active(self.object_id)?;
        if mode.is_none() {
            return Ok(true);
        }
        self.object_lock.has_lock(self.transaction, mode)
    }

    /// Returns the number of item locks tracked at page granularity.
    pub fn tracked_count(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns the object mode held since escalation, if escalated.
    pub fn escalated_mode(&self) -> Option<ObjectLockMode> {
        self.state.lock().escalated
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Releases the tracked item locks, exclusive first and shared last,
    /// leaving the object grant in place.
    ///
    /// Used to release a transaction finest first: items before the schema
    /// and object locks above them.
    pub(crate) fn release_item_locks(&self) -> Result<()> {
        let items = {
            let mut state = self.state.lock();
            state.ensure_active(self.object_id)?;
            mem::take(&mut state.items)
        };
        self.release_items(items)
    }

    /// Releases every item lock, then the object lock and the block's
    /// reference on it.
    ///
    /// Every lock is released even if an earlier release fails; the first
    /// error is returned. The block is unusable afterwards.
    pub fn release_locks(&self) -> Result<()> {
        let items = {
            let mut state = self.state.lock();
            state.ensure_active(self.object_id)?;
            state.released = true;
            state.escalated = None;
            state.intent = ObjectLockMode::None;
            state.explicit = ObjectLockMode::None;
            mem::take(&mut state.items)
        };

        let mut first_error = self.release_items(items).err();

        let result = self
            .object_lock
            .unlock(self.transaction, ObjectLockMode::None)
            .and_then(|_| self.object_lock.release_ref());
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }

        debug!(
            txn = %self.transaction,
            object = %self.object_id,
            "Released owner block"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn release_items(&self, items: HashMap<LogicalPageId, TrackedItem>) -> Result<()> {
        let mut items: Vec<_> = items.into_iter().collect();
        items.sort_by_key(|(_, item)| std::cmp::Reverse(item.mode));

        let count = items.len();
        let mut first_error = None;
        for (_, item) in items {
            let result = item
                .lock
                .unlock(self.transaction, DataLockMode::None)
                .and_then(|_| item.lock.release_ref());
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        trace!(
            txn = %self.transaction,
            object = %self.object_id,
            items = count,
            "Released item locks"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Trades the tracked item locks for one object lock. Failure leaves the
    /// block at item granularity.
    fn try_escalate(&self, timeout: Duration) {
        let target = {
            let state = self.state.lock();
            if state.items.values().all(|item| item.mode.is_read_only()) {
                ObjectLockMode::Shared
            } else {
                ObjectLockMode::Exclusive
            }
        };

        debug!(
            txn = %self.transaction,
            object = %self.object_id,
            mode = %target,
            "Attempting lock escalation"
        );

        if let Err(e) = self.object_lock.lock(self.transaction, target, timeout) {
            debug!(
                txn = %self.transaction,
                object = %self.object_id,
                mode = %target,
                error = %e,
                "Lock escalation failed"
            );
            return;
        }

        let items = {
            let mut state = self.state.lock();
            state.escalated = Some(target);
            mem::take(&mut state.items)
        };

        let count = items.len();
        for (page_id, item) in items {
            let result = item
                .lock
                .unlock(self.transaction, DataLockMode::None)
                .and_then(|_| item.lock.release_ref());
            if let Err(e) = result {
                warn!(
                    txn = %self.transaction,
                    page = %page_id,
                    error = %e,
                    "Failed to release item lock after escalation"
                );
            }
        }

        debug!(
            txn = %self.transaction,
            object = %self.object_id,
            mode = %target,
            released = count,
            "Lock escalation succeeded"
        );
    }
}

impl Drop for DataLockOwnerBlock {
    fn drop(&mut self) {
        if self.state.get_mut().released {
            return;
        }
        warn!(
            txn = %self.transaction,
            object = %self.object_id,
            "Owner block dropped without release"
        );
        if let Err(e) = self.release_locks() {
            warn!(error = %e, "Releasing dropped owner block failed");
        }
    }
}
