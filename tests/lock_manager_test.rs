//! Integration tests for the global and per-database lock managers

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hierlock::common::{LockError, LogicalPageId, ObjectId, SessionId, TransactionId};
use hierlock::lock::{DataLockMode, DatabaseLockMode, ObjectLockMode, SchemaLockMode};
use hierlock::manager::{DatabaseLockManager, GlobalLockManager, LockCounts};

const WAIT: Duration = Duration::from_secs(5);
const SHORT: Duration = Duration::from_millis(100);

fn create_managers() -> (Arc<GlobalLockManager>, DatabaseLockManager) {
    let global = Arc::new(GlobalLockManager::new());
    let manager = DatabaseLockManager::new(Arc::clone(&global), "main").unwrap();
    (global, manager)
}

#[test]
fn test_session_database_locks() {
    let (global, manager) = create_managers();
    let s1 = SessionId::new(1);
    let s2 = SessionId::new(2);

    manager.lock_database(s1, DatabaseLockMode::Shared, WAIT).unwrap();
    manager.lock_database(s2, DatabaseLockMode::Update, WAIT).unwrap();
    assert!(manager.has_database_lock(s1, DatabaseLockMode::Shared).unwrap());
    assert!(!manager.has_database_lock(s1, DatabaseLockMode::Update).unwrap());

    // Update/Update conflict across sessions
    let err = manager
        .lock_database(s1, DatabaseLockMode::Update, SHORT)
        .unwrap_err();
    assert!(err.is_timeout());

    manager.unlock_database(s2).unwrap();
    manager.lock_database(s1, DatabaseLockMode::Exclusive, WAIT).unwrap();
    assert_eq!(global.active_database_count(), 1);

    manager.unlock_database(s1).unwrap();
    assert_eq!(global.active_database_count(), 0);
}

#[test]
fn test_databases_are_independent() {
    let global = Arc::new(GlobalLockManager::new());
    let main = DatabaseLockManager::new(Arc::clone(&global), "main").unwrap();
    let other = DatabaseLockManager::new(Arc::clone(&global), "other").unwrap();
    let s1 = SessionId::new(1);
    let s2 = SessionId::new(2);

    main.lock_database(s1, DatabaseLockMode::Exclusive, WAIT).unwrap();
    other.lock_database(s2, DatabaseLockMode::Exclusive, SHORT).unwrap();
    assert_eq!(global.active_database_count(), 2);
}

#[test]
fn test_schema_locks() {
    let (_global, manager) = create_managers();
    let t1 = TransactionId::new(1);
    let t2 = TransactionId::new(2);
    let object = ObjectId::new(3);

    manager
        .lock_schema(t1, object, SchemaLockMode::SchemaStability, WAIT)
        .unwrap();
    manager
        .lock_schema(t2, object, SchemaLockMode::SchemaStability, WAIT)
        .unwrap();
    let err = manager
        .lock_schema(t2, object, SchemaLockMode::SchemaModification, SHORT)
        .unwrap_err();
    assert!(err.is_timeout());

    manager.unlock_schema(t1, object).unwrap();
    manager
        .lock_schema(t2, object, SchemaLockMode::SchemaModification, WAIT)
        .unwrap();
    assert!(manager
        .transaction_locks(t2)
        .has_schema_lock(object, SchemaLockMode::SchemaModification)
        .unwrap());
    assert!(!manager
        .transaction_locks(t1)
        .has_schema_lock(object, SchemaLockMode::SchemaStability)
        .unwrap());
}

#[test]
fn test_object_lock_conflicts_with_item_intent() {
    let (_global, manager) = create_managers();
    let t1 = TransactionId::new(1);
    let t2 = TransactionId::new(2);
    let object = ObjectId::new(5);

    manager
        .lock_item(t1, object, LogicalPageId::new(1), DataLockMode::Exclusive, WAIT)
        .unwrap();
    let err = manager
        .lock_object(t2, object, ObjectLockMode::Shared, SHORT)
        .unwrap_err();
    assert!(err.is_timeout());

    manager.release_transaction(t1).unwrap();
    manager
        .lock_object(t2, object, ObjectLockMode::Shared, WAIT)
        .unwrap();
    assert!(manager
        .transaction_locks(t2)
        .has_object_lock(object, ObjectLockMode::Shared)
        .unwrap());

    manager
        .unlock_object(t2, object, ObjectLockMode::IntentShared)
        .unwrap();
    assert!(!manager
        .transaction_locks(t2)
        .has_object_lock(object, ObjectLockMode::Shared)
        .unwrap());
}

#[test]
fn test_unlock_object_keeps_item_intent() {
    let (_global, manager) = create_managers();
    let t1 = TransactionId::new(1);
    let t2 = TransactionId::new(2);
    let object = ObjectId::new(5);

    manager
        .lock_item(t1, object, LogicalPageId::new(1), DataLockMode::Exclusive, WAIT)
        .unwrap();
    manager
        .lock_object(t1, object, ObjectLockMode::IntentShared, WAIT)
        .unwrap();
    manager
        .unlock_object(t1, object, ObjectLockMode::None)
        .unwrap();

    // The exclusive item still needs its IntentExclusive on the object
    let locks = manager.transaction_locks(t1);
    assert!(locks
        .has_object_lock(object, ObjectLockMode::IntentExclusive)
        .unwrap());
    let err = manager
        .lock_object(t2, object, ObjectLockMode::Exclusive, SHORT)
        .unwrap_err();
    assert!(err.is_timeout());

    manager.release_transaction(t1).unwrap();
    manager
        .lock_object(t2, object, ObjectLockMode::Exclusive, WAIT)
        .unwrap();
    manager.release_transaction(t2).unwrap();
    assert_eq!(manager.lock_counts(), LockCounts::default());
}

#[test]
fn test_object_lock_outlives_item_unlock() {
    let (_global, manager) = create_managers();
    let t1 = TransactionId::new(1);
    let t2 = TransactionId::new(2);
    let object = ObjectId::new(6);
    let page = LogicalPageId::new(1);

    manager
        .lock_object(t1, object, ObjectLockMode::Shared, WAIT)
        .unwrap();
    manager
        .lock_item(t1, object, page, DataLockMode::Shared, WAIT)
        .unwrap();
    manager
        .data_owner_block(t1, object)
        .unwrap()
        .unlock_item(page, DataLockMode::None)
        .unwrap();

    let locks = manager.transaction_locks(t1);
    assert!(locks.has_object_lock(object, ObjectLockMode::Shared).unwrap());
    let err = manager
        .lock_object(t2, object, ObjectLockMode::IntentExclusive, SHORT)
        .unwrap_err();
    assert!(err.is_timeout());

    // Downgrading keeps the intent of the item lock taken earlier
    manager
        .unlock_object(t1, object, ObjectLockMode::None)
        .unwrap();
    assert!(!locks.has_object_lock(object, ObjectLockMode::Shared).unwrap());
    assert!(locks
        .has_object_lock(object, ObjectLockMode::IntentShared)
        .unwrap());
    manager
        .lock_object(t2, object, ObjectLockMode::IntentExclusive, WAIT)
        .unwrap();
}

#[test]
fn test_release_transaction_releases_everything() {
    let (global, manager) = create_managers();
    let t1 = TransactionId::new(1);

    manager
        .transaction_locks(t1)
        .lock_database(DatabaseLockMode::Shared, WAIT)
        .unwrap();
    for id in 1..=3 {
        let object = ObjectId::new(id);
        manager
            .lock_schema(t1, object, SchemaLockMode::SchemaStability, WAIT)
            .unwrap();
        manager
            .lock_object(t1, object, ObjectLockMode::IntentShared, WAIT)
            .unwrap();
        for page in 0..4 {
            manager
                .lock_item(t1, object, LogicalPageId::new(page), DataLockMode::Shared, WAIT)
                .unwrap();
        }
    }

    let counts = manager.lock_counts();
    assert_eq!(counts.databases, 1);
    assert_eq!(counts.objects, 3);
    assert_eq!(counts.schemas, 3);
    assert_eq!(counts.data, 12);

    manager.release_transaction(t1).unwrap();
    assert_eq!(manager.lock_counts(), LockCounts::default());
    assert_eq!(global.active_database_count(), 0);
    assert_eq!(manager.transaction_count(), 0);

    // The transaction is gone
    assert!(matches!(
        manager.unlock_schema(t1, ObjectId::new(1)),
        Err(LockError::InvalidOwnerState(_))
    ));
}

#[test]
fn test_timed_out_transaction_rolls_back() {
    let (_global, manager) = create_managers();
    let t1 = TransactionId::new(1);
    let t2 = TransactionId::new(2);
    let object = ObjectId::new(1);

    manager
        .lock_item(t1, object, LogicalPageId::new(1), DataLockMode::Exclusive, WAIT)
        .unwrap();
    manager
        .lock_item(t2, object, LogicalPageId::new(2), DataLockMode::Exclusive, WAIT)
        .unwrap();

    // Each waits on the other; one side gives up and rolls back
    let manager = Arc::new(manager);
    let handle = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            manager.lock_item(t1, object, LogicalPageId::new(2), DataLockMode::Shared, WAIT)
        })
    };

    thread::sleep(Duration::from_millis(50));
    let err = manager
        .lock_item(t2, object, LogicalPageId::new(1), DataLockMode::Shared, SHORT)
        .unwrap_err();
    assert!(err.is_timeout());
    manager.release_transaction(t2).unwrap();

    handle.join().unwrap().unwrap();
}

#[test]
fn test_session_lock_blocks_other_transactions() {
    let (_global, manager) = create_managers();
    let session = SessionId::new(1);
    let other = TransactionId::new(9);

    manager
        .lock_database(session, DatabaseLockMode::Exclusive, WAIT)
        .unwrap();

    let err = manager
        .transaction_locks(other)
        .lock_database(DatabaseLockMode::Shared, SHORT)
        .unwrap_err();
    assert!(err.is_timeout());

    manager.unlock_database(session).unwrap();
    manager
        .transaction_locks(other)
        .lock_database(DatabaseLockMode::Shared, WAIT)
        .unwrap();
}
