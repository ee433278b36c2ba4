use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{LockOwner, Result, SessionId};
use crate::lock::{
    DatabaseLock, DatabaseLockMode, FinalReleaseListener, LockIdent, LockRegistry,
};

/// Process-wide root of the lock hierarchy.
///
/// Owns the database-lock registry and the session-scoped database grants.
/// One instance is shared via `Arc` by every [`DatabaseLockManager`].
///
/// [`DatabaseLockManager`]: super::DatabaseLockManager
pub struct GlobalLockManager {
    databases: LockRegistry<DatabaseLockMode>,
    /// Database locks held by sessions, one reference each
    session_locks: Mutex<HashMap<(LockIdent, SessionId), Arc<DatabaseLock>>>,
}

impl GlobalLockManager {
    pub fn new() -> Self {
        Self {
            databases: LockRegistry::new(),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the database lock for `name` with one reference owned by the
    /// caller.
    pub fn database_lock(&self, name: &str) -> Result<Arc<DatabaseLock>> {
        self.databases.get_or_create(LockIdent::database(name)?, None)
    }

    /// Locks database `name` on behalf of `session`.
    ///
    /// The grant is visible to every transaction running inside the session.
    pub fn lock_database(
        &self,
        name: &str,
        session: SessionId,
        mode: DatabaseLockMode,
        timeout: Duration,
    ) -> Result<()> {
        let ident = LockIdent::database(name)?;
        let existing = self
            .session_locks
            .lock()
            .get(&(ident.clone(), session))
            .cloned();

        let (lock, is_new) = match existing {
            Some(lock) => (lock, false),
            None => (self.databases.get_or_create(ident.clone(), None)?, true),
        };
        if let Err(e) = lock.lock(LockOwner::session(session), mode, timeout) {
            if is_new {
                lock.release_ref()?;
            }
            return Err(e);
        }

        if is_new {
            let duplicate = {
                let mut session_locks = self.session_locks.lock();
                match session_locks.get(&(ident.clone(), session)) {
                    Some(_) => Some(lock),
                    None => {
                        session_locks.insert((ident, session), lock);
                        None
                    }
                }
            };
            if let Some(lock) = duplicate {
                lock.release_ref()?;
            }
        }
        debug!(database = name, %session, %mode, "Session database lock acquired");
        Ok(())
    }

    /// Releases the session's lock on database `name` and its reference.
    pub fn unlock_database(&self, name: &str, session: SessionId) -> Result<()> {
        let ident = LockIdent::database(name)?;
        let Some(lock) = self.session_locks.lock().remove(&(ident, session)) else {
            warn!(database = name, %session, "Session holds no database lock");
            return Ok(());
        };

        lock.unlock(LockOwner::session(session), DatabaseLockMode::None)?;
        lock.release_ref()?;
        debug!(database = name, %session, "Session database lock released");
        Ok(())
    }

    /// Returns true if `session` holds at least `mode` on database `name`.
    pub fn has_database_lock(
        &self,
        name: &str,
        session: SessionId,
        mode: DatabaseLockMode,
    ) -> Result<bool> {
        let ident = LockIdent::database(name)?;
        let lock = self.session_locks.lock().get(&(ident, session)).cloned();
        match lock {
            Some(lock) => lock.has_lock(LockOwner::session(session), mode),
            None => Ok(false),
        }
    }

    /// Attaches `listener` to every database lock created from now on.
    pub fn add_listener(&self, listener: Arc<dyn FinalReleaseListener>) {
        self.databases.add_listener(listener);
    }

    /// Returns the number of live database locks.
    pub fn active_database_count(&self) -> usize {
        self.databases.active_count()
    }
}

impl Default for GlobalLockManager {
    fn default() -> Self {
        Self::new()
    }
}
