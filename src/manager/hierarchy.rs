use std::sync::Arc;

use crate::common::{LogicalPageId, ObjectId, Result};
use crate::lock::{
    DataLock, DataLockMode, DatabaseLock, FinalReleaseListener, LockIdent, LockRegistry,
    ObjectLock, ObjectLockMode, SchemaLock, SchemaLockMode,
};

use super::GlobalLockManager;

/// The registries of one open database, wired below its database lock.
///
/// Every getter returns a resource with one reference owned by the caller.
/// Parents are resolved before the child registry is entered, so no two
/// registry maps are ever locked at once.
pub(crate) struct LockHierarchy {
    database: Arc<str>,
    global: Arc<GlobalLockManager>,
    objects: LockRegistry<ObjectLockMode>,
    schemas: LockRegistry<SchemaLockMode>,
    data: LockRegistry<DataLockMode>,
}

impl LockHierarchy {
    pub(crate) fn new(global: Arc<GlobalLockManager>, database: &str) -> Result<Self> {
        // Reject bad names up front rather than on first lock
        LockIdent::database(database)?;
        Ok(Self {
            database: Arc::from(database),
            global,
            objects: LockRegistry::new(),
            schemas: LockRegistry::new(),
            data: LockRegistry::new(),
        })
    }

    pub(crate) fn database_name(&self) -> &str {
        &self.database
    }

    pub(crate) fn global(&self) -> &Arc<GlobalLockManager> {
        &self.global
    }

    pub(crate) fn database_lock(&self) -> Result<Arc<DatabaseLock>> {
        self.global.database_lock(&self.database)
    }

    pub(crate) fn object_lock(&self, object_id: ObjectId) -> Result<Arc<ObjectLock>> {
        let parent = self.database_lock()?;
        self.objects
            .get_or_create(LockIdent::object(object_id), Some(parent))
    }

    pub(crate) fn schema_lock(&self, object_id: ObjectId) -> Result<Arc<SchemaLock>> {
        let parent = self.object_lock(object_id)?;
        self.schemas
            .get_or_create(LockIdent::schema(object_id), Some(parent))
    }

    pub(crate) fn data_lock(
        &self,
        object_id: ObjectId,
        page_id: LogicalPageId,
    ) -> Result<Arc<DataLock>> {
        let parent = self.object_lock(object_id)?;
        self.data
            .get_or_create(LockIdent::data(object_id, page_id), Some(parent))
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn FinalReleaseListener>) {
        self.objects.add_listener(Arc::clone(&listener));
        self.schemas.add_listener(Arc::clone(&listener));
        self.data.add_listener(listener);
    }

    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        (
            self.objects.active_count(),
            self.schemas.active_count(),
            self.data.active_count(),
        )
    }
}
