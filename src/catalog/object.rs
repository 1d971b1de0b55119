//! The flattened catalog object model (spec.md §4.8).
//!
//! The teacher has no schema catalog at all -- its one hardcoded table
//! needs no such layer. Grounded instead on the Design Notes' explicit
//! instruction to flatten the original's deep class hierarchy (separate
//! `Table`/`Index`/`Sequence`/`User`/... types) into one sum type, the
//! way `database/table/row.rs::PersonVersion` already collapses several
//! "kind of change" cases into a single struct with a tag field rather
//! than a type per case.

use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Schema,
    Table,
    Index,
    Sequence,
    User,
    Role,
    Setting,
    Comment,
    Aggregate,
    UserDataType,
}

/// What is actually persisted in `SYS`: spec.md §4.8's literal
/// `SYS(id, kind, sql)` row shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysRow {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub sql: String,
}

/// The richer in-memory view the catalog's lookup maps hold: a `SysRow`
/// plus the `(schema, name)` pair the external parser derived from its
/// `sql` (spec.md §4.8 step 2).
#[derive(Debug, Clone)]
pub struct DbObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub schema: Option<String>,
    pub name: String,
    pub sql: String,
}

impl DbObject {
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn sys_row(&self) -> SysRow {
        SysRow {
            id: self.id,
            kind: self.kind,
            sql: self.sql.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_includes_schema_when_present() {
        let object = DbObject {
            id: ObjectId(1),
            kind: ObjectKind::Table,
            schema: Some("public".to_string()),
            name: "people".to_string(),
            sql: "public.people".to_string(),
        };
        assert_eq!(object.qualified_name(), "public.people");
    }

    #[test]
    fn qualified_name_omits_missing_schema() {
        let object = DbObject {
            id: ObjectId(2),
            kind: ObjectKind::Sequence,
            schema: None,
            name: "seq1".to_string(),
            sql: "seq1".to_string(),
        };
        assert_eq!(object.qualified_name(), "seq1");
    }
}
