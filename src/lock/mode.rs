use std::fmt;
use std::hash::Hash;

/// The four granularities of protectable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Database,
    Object,
    Schema,
    Data,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Database => "database",
            ResourceKind::Object => "object",
            ResourceKind::Schema => "schema",
            ResourceKind::Data => "data",
        };
        f.write_str(name)
    }
}

/// A lock mode of one resource kind.
///
/// Every kind has a `NONE` mode that is compatible with everything and covered
/// by everything. `join` must return the weakest mode covering both arguments;
/// a same-owner request on a resource is granted at `join(held, requested)`.
pub trait LockMode: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    const NONE: Self;
    const KIND: ResourceKind;

    /// Returns true if two different owners may hold `self` and `other` at once.
    fn is_compatible(self, other: Self) -> bool;

    /// Returns true if holding `self` implies holding `other`.
    fn covers(self, other: Self) -> bool;

    /// Returns the weakest mode covering both `self` and `other`.
    fn join(self, other: Self) -> Self;

    fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Database lock modes, ordered None < Shared < Update < Exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DatabaseLockMode {
    #[default]
    None = 0,
    Shared = 1,
    Update = 2,
    Exclusive = 3,
}

/// Object lock modes, including the intent modes used for multi-granularity locking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObjectLockMode {
    #[default]
    None = 0,
    IntentShared = 1,
    Shared = 2,
    Update = 3,
    IntentExclusive = 4,
    Exclusive = 5,
}

/// Schema lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SchemaLockMode {
    #[default]
    None = 0,
    SchemaStability = 1,
    SchemaModification = 2,
}

/// Data item (logical page) lock modes, ordered None < Shared < Update < Exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DataLockMode {
    #[default]
    None = 0,
    Shared = 1,
    Update = 2,
    Exclusive = 3,
}

// Rows and columns follow the enum discriminants.
const SHARED_UPDATE_EXCLUSIVE: [[bool; 4]; 4] = [
    [true, true, true, true],
    [true, true, true, false],
    [true, true, false, false],
    [true, false, false, false],
];

const OBJECT_COMPATIBILITY: [[bool; 6]; 6] = [
    // None
    [true, true, true, true, true, true],
    // IntentShared
    [true, true, true, true, true, false],
    // Shared
    [true, true, true, true, false, false],
    // Update
    [true, true, true, false, false, false],
    // IntentExclusive
    [true, true, false, false, true, false],
    // Exclusive
    [true, false, false, false, false, false],
];

const SCHEMA_COMPATIBILITY: [[bool; 3]; 3] = [
    [true, true, true],
    [true, true, false],
    [true, false, false],
];

impl LockMode for DatabaseLockMode {
    const NONE: Self = DatabaseLockMode::None;
    const KIND: ResourceKind = ResourceKind::Database;

    fn is_compatible(self, other: Self) -> bool {
        SHARED_UPDATE_EXCLUSIVE[self as usize][other as usize]
    }

    fn covers(self, other: Self) -> bool {
        self >= other
    }

    fn join(self, other: Self) -> Self {
        self.max(other)
    }
}

impl LockMode for ObjectLockMode {
    const NONE: Self = ObjectLockMode::None;
    const KIND: ResourceKind = ResourceKind::Object;

    fn is_compatible(self, other: Self) -> bool {
        OBJECT_COMPATIBILITY[self as usize][other as usize]
    }

    fn covers(self, other: Self) -> bool {
        use ObjectLockMode::*;

        if self == other || other == None {
            return true;
        }
        match self {
            Exclusive => true,
            Update => matches!(other, Shared | IntentShared),
            Shared | IntentExclusive => other == IntentShared,
            _ => false,
        }
    }

    fn join(self, other: Self) -> Self {
        if self.covers(other) {
            self
        } else if other.covers(self) {
            other
        } else {
            // Shared or Update combined with IntentExclusive
            ObjectLockMode::Exclusive
        }
    }
}

impl LockMode for SchemaLockMode {
    const NONE: Self = SchemaLockMode::None;
    const KIND: ResourceKind = ResourceKind::Schema;

    fn is_compatible(self, other: Self) -> bool {
        SCHEMA_COMPATIBILITY[self as usize][other as usize]
    }

    fn covers(self, other: Self) -> bool {
        self >= other
    }

    fn join(self, other: Self) -> Self {
        self.max(other)
    }
}

impl LockMode for DataLockMode {
    const NONE: Self = DataLockMode::None;
    const KIND: ResourceKind = ResourceKind::Data;

    fn is_compatible(self, other: Self) -> bool {
        SHARED_UPDATE_EXCLUSIVE[self as usize][other as usize]
    }

    fn covers(self, other: Self) -> bool {
        self >= other
    }

    fn join(self, other: Self) -> Self {
        self.max(other)
    }
}

impl DataLockMode {
    /// Returns the object intent mode that must be held before an item is
    /// locked in this mode. Update announces a write, so it needs
    /// IntentExclusive just like Exclusive.
    pub fn required_intent(self) -> ObjectLockMode {
        match self {
            DataLockMode::None => ObjectLockMode::None,
            DataLockMode::Shared => ObjectLockMode::IntentShared,
            DataLockMode::Update | DataLockMode::Exclusive => ObjectLockMode::IntentExclusive,
        }
    }

    /// Returns true for modes that never modify the item.
    pub fn is_read_only(self) -> bool {
        matches!(self, DataLockMode::None | DataLockMode::Shared)
    }
}

impl ObjectLockMode {
    /// Returns true if holding this mode on an object implies holding `item`
    /// on every data item of that object.
    pub fn subsumes_item(self, item: DataLockMode) -> bool {
        match item {
            DataLockMode::None => true,
            DataLockMode::Shared => matches!(
                self,
                ObjectLockMode::Shared | ObjectLockMode::Update | ObjectLockMode::Exclusive
            ),
            DataLockMode::Update => {
                matches!(self, ObjectLockMode::Update | ObjectLockMode::Exclusive)
            }
            DataLockMode::Exclusive => self == ObjectLockMode::Exclusive,
        }
    }

    pub fn is_intent(self) -> bool {
        matches!(
            self,
            ObjectLockMode::IntentShared | ObjectLockMode::IntentExclusive
        )
    }
}

macro_rules! impl_mode_display {
    ($mode:ty) => {
        impl fmt::Display for $mode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

impl_mode_display!(DatabaseLockMode);
impl_mode_display!(ObjectLockMode);
impl_mode_display!(SchemaLockMode);
impl_mode_display!(DataLockMode);
