use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::common::{LockError, LockOwner, Result};

use super::{
    DataLockMode, DatabaseLockMode, LockIdent, LockMode, ObjectLockMode, SchemaLockMode,
};

/// Receives the one-time notification fired when a resource's reference count
/// returns to zero.
pub trait FinalReleaseListener: Send + Sync {
    fn on_final_release(&self, ident: &LockIdent);
}

/// Lifecycle view of a lock resource, independent of its mode type.
///
/// Parent links are held through this trait so that a data lock can reference
/// its object lock without knowing the object's mode type.
pub trait ReferenceLock: Send + Sync {
    fn ident(&self) -> &LockIdent;
    fn add_ref(&self);
    fn release_ref(&self) -> Result<()>;
    fn ref_count(&self) -> usize;
}

/// A request parked until it becomes compatible with the grant set
struct Waiter<M> {
    ticket: u64,
    owner: LockOwner,
    mode: M,
    wake: Sender<()>,
}

/// Grant and wait state, only ever touched under the resource mutex
struct LockTable<M> {
    initialised: bool,
    granted: HashMap<LockOwner, M>,
    waiters: VecDeque<Waiter<M>>,
    next_ticket: u64,
}

impl<M: LockMode> LockTable<M> {
    fn new() -> Self {
        Self {
            initialised: false,
            granted: HashMap::new(),
            waiters: VecDeque::new(),
            next_ticket: 0,
        }
    }

    /// Resolves the grant entry an owner is seen through by queries: its own
    /// entry, or the entry of its session-only owner.
    fn active_owner(&self, owner: LockOwner) -> Option<LockOwner> {
        if self.granted.contains_key(&owner) {
            return Some(owner);
        }
        let session_owner = owner.session_only();
        if session_owner != owner && self.granted.contains_key(&session_owner) {
            return Some(session_owner);
        }
        None
    }

    fn held(&self, owner: LockOwner) -> M {
        self.granted.get(&owner).copied().unwrap_or(M::NONE)
    }

    fn compatible_with_grants(&self, owner: LockOwner, mode: M) -> bool {
        self.granted
            .iter()
            .filter(|(holder, _)| !owner.is_same_holder(holder))
            .all(|(_, held)| mode.is_compatible(*held))
    }

    /// Returns true if `owner` may be granted `mode` now.
    ///
    /// Owners converting an existing grant are only checked against the grant
    /// set; new owners must also be compatible with the first `queued` waiters
    /// of other owners so they cannot overtake them.
    fn can_grant(&self, owner: LockOwner, mode: M, queued: usize) -> bool {
        if !self.compatible_with_grants(owner, mode) {
            return false;
        }
        if self.granted.contains_key(&owner) {
            return true;
        }
        self.waiters
            .iter()
            .take(queued)
            .filter(|waiter| !owner.is_same_holder(&waiter.owner))
            .all(|waiter| mode.is_compatible(waiter.mode))
    }

    fn enqueue(&mut self, owner: LockOwner, mode: M, wake: Sender<()>) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiters.push_back(Waiter {
            ticket,
            owner,
            mode,
            wake,
        });
        ticket
    }

    fn remove_waiter(&mut self, ticket: u64) -> bool {
        match self.waiters.iter().position(|w| w.ticket == ticket) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Grants every queued request that is now compatible, in FIFO order.
    /// Returns the number of waiters resumed.
    fn grant_waiters(&mut self) -> usize {
        let mut resumed = 0;
        let mut index = 0;
        while index < self.waiters.len() {
            let (owner, mode) = {
                let waiter = &self.waiters[index];
                (waiter.owner, waiter.mode)
            };
            let target = self.held(owner).join(mode);
            if self.can_grant(owner, target, index) {
                if let Some(waiter) = self.waiters.remove(index) {
                    self.granted.insert(owner, target);
                    // Capacity one and a single send per waiter, so this never blocks
                    let _ = waiter.wake.try_send(());
                    resumed += 1;
                }
            } else {
                index += 1;
            }
        }
        resumed
    }
}

/// Grant/wait engine for a single named resource.
///
/// A resource tracks at most one mode per owner. Requests that conflict with
/// modes held by other owners park the calling thread until a release makes
/// them compatible or their timeout elapses. The table mutex is held only
/// while the grant set and wait queue are read or changed.
///
/// Reference counting is separate from granting: whoever holds a grant is
/// expected to also hold a reference, and the final [`release_ref`] fires the
/// final-release notification exactly once.
///
/// [`release_ref`]: LockResource::release_ref
pub struct LockResource<M: LockMode> {
    ident: LockIdent,
    parent: OnceLock<Arc<dyn ReferenceLock>>,
    ref_count: AtomicUsize,
    released: AtomicBool,
    table: Mutex<LockTable<M>>,
    listeners: Mutex<Vec<Arc<dyn FinalReleaseListener>>>,
}

pub type DatabaseLock = LockResource<DatabaseLockMode>;
pub type ObjectLock = LockResource<ObjectLockMode>;
pub type SchemaLock = LockResource<SchemaLockMode>;
pub type DataLock = LockResource<DataLockMode>;

impl<M: LockMode> LockResource<M> {
    /// Creates an uninitialised resource with no parent and no references.
    pub fn new(ident: LockIdent) -> Self {
        Self {
            ident,
            parent: OnceLock::new(),
            ref_count: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            table: Mutex::new(LockTable::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Creates an uninitialised resource parented to `parent`.
    /// Takes a reference on the parent that is released at final release.
    pub fn with_parent(ident: LockIdent, parent: Arc<dyn ReferenceLock>) -> Self {
        let resource = Self::new(ident);
        parent.add_ref();
        // A fresh OnceLock cannot already be set
        let _ = resource.parent.set(parent);
        resource
    }

    /// Prepares the empty grant set. Must be called exactly once.
    pub fn initialise(&self) -> Result<()> {
        let mut table = self.table.lock();
        if table.initialised {
            return Err(LockError::InvalidOwnerState(format!(
                "lock {} already initialised",
                self.ident
            )));
        }
        table.initialised = true;
        debug!(lock = %self.ident, "Initialised");
        Ok(())
    }

    pub fn ident(&self) -> &LockIdent {
        &self.ident
    }

    /// Returns the next-coarser resource in the hierarchy, if any.
    pub fn parent(&self) -> Option<&Arc<dyn ReferenceLock>> {
        self.parent.get()
    }

    /// Registers a listener for the final-release notification.
    pub fn subscribe(&self, listener: Arc<dyn FinalReleaseListener>) {
        self.listeners.lock().push(listener);
    }

    /// Acquires `mode` for `owner`, blocking for at most `timeout`.
    ///
    /// An owner that already holds a mode is strengthened to the join of the
    /// held and requested modes; a request already covered is a no-op. On
    /// timeout the request is removed from the wait queue before
    /// [`LockError::LockTimeout`] is returned.
    pub fn lock(&self, owner: impl Into<LockOwner>, mode: M, timeout: Duration) -> Result<()> {
        let owner = owner.into();
        let (ticket, receiver): (u64, Receiver<()>) = {
            let mut table = self.table.lock();
            self.ensure_initialised(&table)?;
            Self::ensure_owner(owner)?;

            let held = table.held(owner);
            let target = held.join(mode);
            if target == held {
                return Ok(());
            }

            let queued = table.waiters.len();
            if table.can_grant(owner, target, queued) {
                table.granted.insert(owner, target);
                trace!(lock = %self.ident, %owner, mode = %target, "Lock granted");
                return Ok(());
            }

            let (sender, receiver) = bounded(1);
            let ticket = table.enqueue(owner, mode, sender);
            debug!(
                lock = %self.ident,
                %owner,
                %mode,
                waiters = table.waiters.len(),
                "Lock request waiting"
            );
            (ticket, receiver)
        };

        if receiver.recv_timeout(timeout).is_ok() {
            trace!(lock = %self.ident, %owner, %mode, "Lock granted after wait");
            return Ok(());
        }

        let mut table = self.table.lock();
        if table.remove_waiter(ticket) {
            // Requests queued behind this one may no longer be blocked
            table.grant_waiters();
            debug!(lock = %self.ident, %owner, %mode, ?timeout, "Lock request timed out");
            return Err(LockError::LockTimeout {
                resource: self.ident.to_string(),
                timeout,
            });
        }

        // Granted between the timeout firing and re-taking the table
        Ok(())
    }

    /// Releases or downgrades the mode held by `owner`.
    ///
    /// `M::NONE` removes the owner's grant; a weaker mode downgrades it. Any
    /// change re-evaluates the wait queue.
    ///
    /// Only the owner's own grant is touched. A transaction never releases
    /// the grant of the session it runs in.
    pub fn unlock(&self, owner: impl Into<LockOwner>, mode: M) -> Result<()> {
        let owner = owner.into();
        let mut table = self.table.lock();
        self.ensure_initialised(&table)?;

        if !table.granted.contains_key(&owner) {
            warn!(lock = %self.ident, %owner, "Unlock called when lock not held");
            return Ok(());
        }
        let held = table.held(owner);
        if mode.is_none() {
            table.granted.remove(&owner);
        } else if held == mode {
            return Ok(());
        } else if held.covers(mode) {
            table.granted.insert(owner, mode);
        } else {
            return Err(LockError::InvalidLockMode {
                resource: self.ident.to_string(),
                held: held.to_string(),
                requested: mode.to_string(),
            });
        }

        let resumed = table.grant_waiters();
        trace!(lock = %self.ident, %owner, %mode, resumed, "Lock released");
        Ok(())
    }

    /// Returns true if `owner` currently holds at least `mode`.
    ///
    /// Asking for `M::NONE` returns true when the owner holds any mode.
    pub fn has_lock(&self, owner: impl Into<LockOwner>, mode: M) -> Result<bool> {
        let owner = owner.into();
        let table = self.table.lock();
        self.ensure_initialised(&table)?;

        Ok(match table.active_owner(owner) {
            Some(active) => table.held(active).covers(mode),
            None => false,
        })
    }

    /// Returns the mode held by `owner` (`M::NONE` if nothing is held).
    pub fn held_mode(&self, owner: impl Into<LockOwner>) -> M {
        let owner = owner.into();
        let table = self.table.lock();
        table
            .active_owner(owner)
            .map(|active| table.held(active))
            .unwrap_or(M::NONE)
    }

    /// Returns the number of owners currently holding a mode.
    pub fn granted_count(&self) -> usize {
        self.table.lock().granted.len()
    }

    /// Returns the number of parked requests.
    pub fn waiter_count(&self) -> usize {
        self.table.lock().waiters.len()
    }

    pub fn add_ref(&self) {
        debug_assert!(
            !self.released.load(Ordering::Acquire),
            "add_ref after final release"
        );
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Adds a reference unless the count is already zero.
    pub(crate) fn try_add_ref(&self) -> bool {
        let mut current = self.ref_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.ref_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Drops a reference. The last one fires the final-release notification.
    pub fn release_ref(&self) -> Result<()> {
        let mut current = self.ref_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(LockError::InvalidOwnerState(format!(
                    "reference count underflow on {}",
                    self.ident
                )));
            }
            match self.ref_count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if current == 1 {
            self.on_final_release();
        }
        Ok(())
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Returns true once the final-release notification has fired.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn on_final_release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(lock = %self.ident, "Lock final release");

        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_final_release(&self.ident);
        }

        if let Some(parent) = self.parent.get() {
            if let Err(e) = parent.release_ref() {
                warn!(lock = %self.ident, parent = %parent.ident(), error = %e, "Parent release failed");
            }
        }
    }

    fn ensure_initialised(&self, table: &LockTable<M>) -> Result<()> {
        if table.initialised {
            Ok(())
        } else {
            Err(LockError::InvalidOwnerState(format!(
                "lock {} used before initialise",
                self.ident
            )))
        }
    }

    fn ensure_owner(owner: LockOwner) -> Result<()> {
        if owner.is_session_only() && owner.session.as_u64() == 0 {
            return Err(LockError::InvalidOwnerState(
                "lock owner has neither a session nor a transaction".to_string(),
            ));
        }
        Ok(())
    }
}

impl<M: LockMode> ReferenceLock for LockResource<M> {
    fn ident(&self) -> &LockIdent {
        &self.ident
    }

    fn add_ref(&self) {
        LockResource::add_ref(self)
    }

    fn release_ref(&self) -> Result<()> {
        LockResource::release_ref(self)
    }

    fn ref_count(&self) -> usize {
        LockResource::ref_count(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{LogicalPageId, ObjectId, SessionId, TransactionId};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);

    fn data_lock() -> DataLock {
        let lock = DataLock::new(LockIdent::data(ObjectId::new(1), LogicalPageId::new(1)));
        lock.initialise().unwrap();
        lock
    }

    struct Counter(AtomicUsize);

    impl FinalReleaseListener for Counter {
        fn on_final_release(&self, _ident: &LockIdent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lock_resource_requires_initialise() {
        let lock = DataLock::new(LockIdent::data(ObjectId::new(1), LogicalPageId::new(1)));
        let t1 = TransactionId::new(1);

        assert!(matches!(
            lock.lock(t1, DataLockMode::Shared, SHORT),
            Err(LockError::InvalidOwnerState(_))
        ));

        lock.initialise().unwrap();
        assert!(matches!(
            lock.initialise(),
            Err(LockError::InvalidOwnerState(_))
        ));
    }

    #[test]
    fn test_lock_resource_strengthens_in_place() {
        let lock = data_lock();
        let t1 = TransactionId::new(1);

        lock.lock(t1, DataLockMode::Shared, SHORT).unwrap();
        lock.lock(t1, DataLockMode::Exclusive, SHORT).unwrap();
        lock.lock(t1, DataLockMode::Shared, SHORT).unwrap();

        assert_eq!(lock.granted_count(), 1);
        assert_eq!(lock.held_mode(t1), DataLockMode::Exclusive);
    }

    #[test]
    fn test_lock_resource_timeout_leaves_no_waiter() {
        let lock = data_lock();
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);

        lock.lock(t1, DataLockMode::Exclusive, SHORT).unwrap();
        let result = lock.lock(t2, DataLockMode::Shared, SHORT);

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(lock.waiter_count(), 0);
        assert!(!lock.has_lock(t2, DataLockMode::None).unwrap());

        // A later release must not grant the abandoned request
        lock.unlock(t1, DataLockMode::None).unwrap();
        assert_eq!(lock.granted_count(), 0);
    }

    #[test]
    fn test_lock_resource_release_wakes_waiter() {
        let lock = Arc::new(data_lock());
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);

        lock.lock(t1, DataLockMode::Exclusive, SHORT).unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.lock(t2, DataLockMode::Shared, Duration::from_secs(5)))
        };

        while lock.waiter_count() == 0 {
            thread::yield_now();
        }
        lock.unlock(t1, DataLockMode::None).unwrap();

        waiter.join().unwrap().unwrap();
        assert!(lock.has_lock(t2, DataLockMode::Shared).unwrap());
    }

    #[test]
    fn test_lock_resource_downgrade() {
        let lock = data_lock();
        let t1 = TransactionId::new(1);

        lock.lock(t1, DataLockMode::Exclusive, SHORT).unwrap();
        lock.unlock(t1, DataLockMode::Shared).unwrap();
        assert_eq!(lock.held_mode(t1), DataLockMode::Shared);

        assert!(matches!(
            lock.unlock(t1, DataLockMode::Update),
            Err(LockError::InvalidLockMode { .. })
        ));
    }

    #[test]
    fn test_lock_resource_fifo_blocks_overtaking() {
        let lock = Arc::new(data_lock());
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        let t3 = TransactionId::new(3);

        lock.lock(t1, DataLockMode::Shared, SHORT).unwrap();

        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.lock(t2, DataLockMode::Exclusive, Duration::from_secs(5)))
        };
        while lock.waiter_count() == 0 {
            thread::yield_now();
        }

        // Compatible with the grant set, but queued behind the writer
        assert!(lock.lock(t3, DataLockMode::Shared, SHORT).unwrap_err().is_timeout());

        lock.unlock(t1, DataLockMode::None).unwrap();
        writer.join().unwrap().unwrap();
        assert!(lock.has_lock(t2, DataLockMode::Exclusive).unwrap());
    }

    #[test]
    fn test_lock_resource_session_grant_visible_to_transaction() {
        let lock = data_lock();
        let session = SessionId::new(9);
        let txn = LockOwner::new(session, TransactionId::new(4));

        lock.lock(session, DataLockMode::Shared, SHORT).unwrap();
        assert!(lock.has_lock(txn, DataLockMode::Shared).unwrap());
        assert!(!lock.has_lock(TransactionId::new(4), DataLockMode::Shared).unwrap());
    }

    #[test]
    fn test_transaction_unlock_keeps_session_grant() {
        let lock = data_lock();
        let session = SessionId::new(9);
        let txn = LockOwner::new(session, TransactionId::new(4));

        lock.lock(session, DataLockMode::Exclusive, SHORT).unwrap();
        lock.unlock(txn, DataLockMode::None).unwrap();

        assert!(lock.has_lock(session, DataLockMode::Exclusive).unwrap());
        assert!(lock.has_lock(txn, DataLockMode::Exclusive).unwrap());
        assert_eq!(lock.granted_count(), 1);
    }

    #[test]
    fn test_lock_resource_final_release_fires_once() {
        let parent = Arc::new(ObjectLock::new(LockIdent::object(ObjectId::new(1))));
        parent.initialise().unwrap();
        parent.add_ref();

        let child = DataLock::with_parent(
            LockIdent::data(ObjectId::new(1), LogicalPageId::new(2)),
            parent.clone(),
        );
        child.initialise().unwrap();
        child.add_ref();
        assert_eq!(parent.ref_count(), 2);

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        child.subscribe(counter.clone());
        parent.subscribe(counter.clone());

        child.release_ref().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(parent.ref_count(), 1);
        assert!(child.release_ref().is_err());

        parent.release_ref().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
