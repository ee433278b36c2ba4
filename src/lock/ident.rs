use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::common::{
    LockError, LogicalPageId, ObjectId, Result, DATABASE_LOCK_PREFIX, DATA_LOCK_PREFIX,
    OBJECT_LOCK_PREFIX, SCHEMA_LOCK_PREFIX,
};

use super::ResourceKind;

/// Identity of a lock resource.
///
/// The text form is `DBL:<name>`, `OBL:<object>`, `SCL:<object>` or
/// `DL:<object>:<page>`. Object and schema identities are scoped to the
/// database whose manager owns the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockIdent {
    Database(Arc<str>),
    Object(ObjectId),
    Schema(ObjectId),
    Data(ObjectId, LogicalPageId),
}

impl LockIdent {
    /// Creates a database identity. The name must not be empty or contain ':'.
    pub fn database(name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(':') {
            return Err(LockError::InvalidIdentifier(format!(
                "invalid database name {:?}",
                name
            )));
        }
        Ok(LockIdent::Database(Arc::from(name)))
    }

    pub fn object(object_id: ObjectId) -> Self {
        LockIdent::Object(object_id)
    }

    pub fn schema(object_id: ObjectId) -> Self {
        LockIdent::Schema(object_id)
    }

    pub fn data(object_id: ObjectId, page_id: LogicalPageId) -> Self {
        LockIdent::Data(object_id, page_id)
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            LockIdent::Database(_) => ResourceKind::Database,
            LockIdent::Object(_) => ResourceKind::Object,
            LockIdent::Schema(_) => ResourceKind::Schema,
            LockIdent::Data(_, _) => ResourceKind::Data,
        }
    }

    /// Returns the object this identity belongs to, if any.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            LockIdent::Database(_) => None,
            LockIdent::Object(id) | LockIdent::Schema(id) | LockIdent::Data(id, _) => Some(*id),
        }
    }

    /// Fails with `InvalidIdentifier` unless this identity is of `kind`.
    pub fn expect_kind(&self, kind: ResourceKind) -> Result<()> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(LockError::InvalidIdentifier(format!(
                "{} is not a {} lock identity",
                self, kind
            )))
        }
    }
}

impl fmt::Display for LockIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockIdent::Database(name) => write!(f, "{}:{}", DATABASE_LOCK_PREFIX, name),
            LockIdent::Object(id) => write!(f, "{}:{}", OBJECT_LOCK_PREFIX, id.0),
            LockIdent::Schema(id) => write!(f, "{}:{}", SCHEMA_LOCK_PREFIX, id.0),
            LockIdent::Data(id, page) => write!(f, "{}:{}:{}", DATA_LOCK_PREFIX, id.0, page.0),
        }
    }
}

impl FromStr for LockIdent {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let invalid = || LockError::InvalidIdentifier(format!("malformed lock key {:?}", s));

        let parse_object = |part: &str| part.parse::<u32>().map(ObjectId).map_err(|_| invalid());

        match parts.as_slice() {
            [DATABASE_LOCK_PREFIX, name] => LockIdent::database(name),
            [OBJECT_LOCK_PREFIX, object] => Ok(LockIdent::Object(parse_object(*object)?)),
            [SCHEMA_LOCK_PREFIX, object] => Ok(LockIdent::Schema(parse_object(*object)?)),
            [DATA_LOCK_PREFIX, object, page] => {
                let page = page.parse::<u64>().map_err(|_| invalid())?;
                Ok(LockIdent::Data(parse_object(*object)?, LogicalPageId(page)))
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_ident_round_trips_through_text() {
        let idents = [
            LockIdent::database("main").unwrap(),
            LockIdent::object(ObjectId::new(7)),
            LockIdent::schema(ObjectId::new(7)),
            LockIdent::data(ObjectId::new(7), LogicalPageId::new(42)),
        ];

        for ident in idents {
            let parsed: LockIdent = ident.to_string().parse().unwrap();
            assert_eq!(parsed, ident);
        }
    }

    #[test]
    fn test_lock_ident_rejects_wrong_segment_count() {
        assert!(matches!(
            "DL:7".parse::<LockIdent>(),
            Err(LockError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            "OBL:7:1".parse::<LockIdent>(),
            Err(LockError::InvalidIdentifier(_))
        ));
        assert!("XYZ:1".parse::<LockIdent>().is_err());
        assert!("DL:x:1".parse::<LockIdent>().is_err());
    }

    #[test]
    fn test_lock_ident_rejects_empty_database_name() {
        assert!(LockIdent::database("").is_err());
        assert!("DBL:".parse::<LockIdent>().is_err());
    }

    #[test]
    fn test_lock_ident_kind() {
        let ident = LockIdent::data(ObjectId::new(1), LogicalPageId::new(2));
        assert_eq!(ident.kind(), ResourceKind::Data);
        assert_eq!(ident.object_id(), Some(ObjectId::new(1)));
        assert!(ident.expect_kind(ResourceKind::Object).is_err());
    }
}
