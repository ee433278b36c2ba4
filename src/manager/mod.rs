mod database;
mod global;
mod hierarchy;

pub use database::*;
pub use global::*;
pub(crate) use hierarchy::LockHierarchy;
