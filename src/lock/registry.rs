use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::Result;

use super::{FinalReleaseListener, LockIdent, LockMode, LockResource, ReferenceLock};

/// Shared registry state, also reachable from the eviction hook
struct RegistryState<M: LockMode> {
    /// Live resources keyed by identity
    active: Mutex<HashMap<LockIdent, Arc<LockResource<M>>>>,
    /// Listeners attached to every resource this registry creates
    listeners: Mutex<Vec<Arc<dyn FinalReleaseListener>>>,
}

/// Removes a resource from its registry when it is finally released
struct Evictor<M: LockMode> {
    state: Weak<RegistryState<M>>,
}

impl<M: LockMode> FinalReleaseListener for Evictor<M> {
    fn on_final_release(&self, ident: &LockIdent) {
        let Some(state) = self.state.upgrade() else {
            return;
        };

        let mut active = state.active.lock();
        // A replacement created after the count hit zero must stay
        if active.get(ident).is_some_and(|resource| resource.is_released()) {
            active.remove(ident);
            debug!(lock = %ident, remaining = active.len(), "Evicted lock");
        }
    }
}

/// LockRegistry maps a resource identity to the single live resource of one
/// kind.
///
/// Every handle returned by the registry carries one reference that the caller
/// must release exactly once. When the last reference goes, the resource is
/// evicted; a later lookup of the same identity builds a fresh instance.
pub struct LockRegistry<M: LockMode> {
    state: Arc<RegistryState<M>>,
}

impl<M: LockMode> LockRegistry<M> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RegistryState {
                active: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attaches `listener` to every resource created from now on.
    pub fn add_listener(&self, listener: Arc<dyn FinalReleaseListener>) {
        self.state.listeners.lock().push(listener);
    }

    /// Returns the live resource for `ident` with one new reference, creating,
    /// initialising and parenting it if absent.
    ///
    /// `parent` carries one reference owned by the caller; it is consumed
    /// whether or not a new resource is created. A created resource takes its
    /// own reference on the parent.
    pub fn get_or_create(
        &self,
        ident: LockIdent,
        parent: Option<Arc<dyn ReferenceLock>>,
    ) -> Result<Arc<LockResource<M>>> {
        let result = self.lookup_or_insert(ident, parent.as_ref());

        if let Some(parent) = parent {
            parent.release_ref()?;
        }
        result
    }

    /// Returns the live resource for `ident` with one new reference, if any.
    pub fn get(&self, ident: &LockIdent) -> Option<Arc<LockResource<M>>> {
        let active = self.state.active.lock();
        active
            .get(ident)
            .filter(|resource| resource.try_add_ref())
            .cloned()
    }

    pub fn contains(&self, ident: &LockIdent) -> bool {
        self.state.active.lock().contains_key(ident)
    }

    /// Returns the number of live resources.
    pub fn active_count(&self) -> usize {
        self.state.active.lock().len()
    }

    fn lookup_or_insert(
        &self,
        ident: LockIdent,
        parent: Option<&Arc<dyn ReferenceLock>>,
    ) -> Result<Arc<LockResource<M>>> {
        ident.expect_kind(M::KIND)?;

        let mut active = self.state.active.lock();
        if let Some(existing) = active.get(&ident) {
            if existing.try_add_ref() {
                return Ok(Arc::clone(existing));
            }
        }

        let resource = Arc::new(match parent {
            Some(parent) => LockResource::with_parent(ident.clone(), Arc::clone(parent)),
            None => LockResource::new(ident.clone()),
        });
        resource.initialise()?;
        resource.subscribe(Arc::new(Evictor {
            state: Arc::downgrade(&self.state),
        }));
        for listener in self.state.listeners.lock().iter() {
            resource.subscribe(Arc::clone(listener));
        }
        resource.add_ref();

        active.insert(ident, Arc::clone(&resource));
        Ok(resource)
    }
}

impl<M: LockMode> Default for LockRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
