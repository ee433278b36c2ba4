use std::fmt;

/// Transaction identifier - names the requester of a lock.
///
/// Supplied by the caller; the lock manager never generates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

/// Session identifier - owns session-scoped locks such as the database lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Logical object identifier (table, index, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// Logical page identifier within an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalPageId(pub u64);

impl LogicalPageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogicalPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalPageId({})", self.0)
    }
}

/// Identity under which a lock is granted: a session, optionally narrowed to a
/// transaction running inside it.
///
/// An owner whose transaction is zero is a session-only owner. Grants made to a
/// session-only owner are visible to every transaction of that session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner {
    pub session: SessionId,
    pub transaction: TransactionId,
}

impl LockOwner {
    pub fn new(session: SessionId, transaction: TransactionId) -> Self {
        Self {
            session,
            transaction,
        }
    }

    /// Creates a session-only owner.
    pub fn session(session: SessionId) -> Self {
        Self {
            session,
            transaction: TransactionId::default(),
        }
    }

    /// Returns the session-only owner this owner falls back to.
    pub fn session_only(&self) -> Self {
        Self::session(self.session)
    }

    pub fn is_session_only(&self) -> bool {
        self.transaction.is_zero()
    }

    /// Returns true if grants of `other` never conflict with requests of
    /// `self`: the same owner, or a transaction and its own session.
    pub fn is_same_holder(&self, other: &LockOwner) -> bool {
        self == other
            || (self.session == other.session
                && self.session.as_u64() != 0
                && (self.is_session_only() || other.is_session_only()))
    }
}

impl From<TransactionId> for LockOwner {
    fn from(transaction: TransactionId) -> Self {
        Self::new(SessionId::default(), transaction)
    }
}

impl From<SessionId> for LockOwner {
    fn from(session: SessionId) -> Self {
        Self::session(session)
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session.0, self.transaction.0)
    }
}
