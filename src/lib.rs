//! Hierlock - A multi-granularity hierarchical lock manager
//!
//! This crate provides the concurrency-control core of a page-oriented
//! transactional storage engine. Transactions lock resources at four
//! granularities arranged in a hierarchy:
//!
//! ```text
//! database (DBL:name)
//!   └── object (OBL:id)
//!         ├── schema (SCL:id)
//!         └── data item (DL:id:page)
//! ```
//!
//! Conflicting requests block their thread until the holder releases or the
//! per-call timeout elapses. There is no deadlock detection: a timeout is the
//! only failure a waiter sees.
//!
//! # Architecture
//!
//! - **Locks** (`lock`): modes, identities and the grant/wait engine
//!   - `LockMode`: per-kind compatibility matrices and strengthening lattice
//!   - `LockResource`: grants, FIFO wait queue and reference counting for one resource
//!   - `LockRegistry`: get-or-create cache that evicts resources on final release
//!
//! - **Owner blocks** (`owner`): per-transaction bookkeeping
//!   - `DataLockOwnerBlock`: item locks on one object, with escalation to an object lock
//!   - `TransactionLockOwnerBlock`: every lock of one transaction, released together
//!
//! - **Managers** (`manager`): the entry points
//!   - `GlobalLockManager`: process-wide database-lock registry and session locks
//!   - `DatabaseLockManager`: object, schema and item locks of one open database
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hierlock::common::{LogicalPageId, ObjectId, TransactionId};
//! use hierlock::lock::{DataLockMode, ObjectLockMode};
//! use hierlock::manager::{DatabaseLockManager, GlobalLockManager};
//!
//! let global = Arc::new(GlobalLockManager::new());
//! let manager = DatabaseLockManager::new(global, "main").unwrap();
//! let txn = TransactionId::new(1);
//! let timeout = Duration::from_secs(1);
//!
//! let block = manager
//!     .get_or_create_data_owner_block(txn, ObjectId::new(1), 100)
//!     .unwrap();
//! block
//!     .lock_item(LogicalPageId::new(1), DataLockMode::Exclusive, timeout)
//!     .unwrap();
//! assert!(block.has_owner_lock(ObjectLockMode::IntentExclusive).unwrap());
//!
//! // Commit or rollback
//! manager.release_transaction(txn).unwrap();
//! ```

pub mod common;
pub mod lock;
pub mod manager;
pub mod owner;

// Re-export commonly used types at the crate root
pub use common::{LockError, LockOwner, ObjectId, Result, SessionId, TransactionId};
