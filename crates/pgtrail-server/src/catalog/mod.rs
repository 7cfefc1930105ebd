//! Schema catalog inspection
//!
//! Read-only probes answering "does this object exist, and does it look the way the installer
//! expects". Missing objects are `Ok(false)`; only connectivity problems are errors.

pub mod memory;
pub mod postgres;

use crate::error::AuditResult;
use async_trait::async_trait;
use pgtrail_common::{Ident, QualifiedName};
use serde::Serialize;
use std::fmt;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

/// A database object the installer manages
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatalogObject {
    Schema(Ident),
    EnumType(QualifiedName),
    /// Matched by name and argument types, e.g. `["jsonb", "text[]"]`
    Function {
        name: QualifiedName,
        args: Vec<String>,
    },
    Table(QualifiedName),
    /// Matched by name and formatted type (`format_type` output)
    Column {
        table: QualifiedName,
        name: Ident,
        data_type: String,
    },
    Index {
        table: QualifiedName,
        name: Ident,
    },
    Trigger {
        table: QualifiedName,
        name: Ident,
    },
}

impl CatalogObject {
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogObject::Schema(_) => "schema",
            CatalogObject::EnumType(_) => "type",
            CatalogObject::Function { .. } => "function",
            CatalogObject::Table(_) => "table",
            CatalogObject::Column { .. } => "column",
            CatalogObject::Index { .. } => "index",
            CatalogObject::Trigger { .. } => "trigger",
        }
    }

    /// Table the object belongs to, for per-table objects.
    pub fn table(&self) -> Option<&QualifiedName> {
        match self {
            CatalogObject::Column { table, .. }
            | CatalogObject::Index { table, .. }
            | CatalogObject::Trigger { table, .. } => Some(table),
            CatalogObject::Table(table) => Some(table),
            _ => None,
        }
    }
}

impl fmt::Display for CatalogObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogObject::Schema(name) => write!(f, "schema {}", name),
            CatalogObject::EnumType(name) => write!(f, "type {}", name),
            CatalogObject::Function { name, args } => {
                write!(f, "function {}({})", name, args.join(", "))
            },
            CatalogObject::Table(name) => write!(f, "table {}", name),
            CatalogObject::Column {
                table,
                name,
                data_type,
            } => write!(f, "column {}.{} {}", table, name, data_type),
            CatalogObject::Index { table, name } => write!(f, "index {} on {}", name, table),
            CatalogObject::Trigger { table, name } => write!(f, "trigger {} on {}", name, table),
        }
    }
}

/// One column of an existing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Whether a formatted catalog type satisfies an expected type.
///
/// `format_type` drops the schema of types visible on the search path, so a schema-qualified
/// expectation also matches its bare name.
pub fn same_type(expected: &str, actual: &str) -> bool {
    if expected == actual {
        return true;
    }
    match expected.rsplit_once('.') {
        Some((_, bare)) => bare == actual,
        None => false,
    }
}

/// Read-only view of the target database's catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn exists(&self, object: &CatalogObject) -> AuditResult<bool>;

    /// Columns of `table` in attribute order; empty when the table is missing.
    async fn columns(&self, table: &QualifiedName) -> AuditResult<Vec<ColumnInfo>>;

    /// `Some(enabled)` for an installed trigger, `None` when it is missing.
    async fn trigger_state(&self, table: &QualifiedName, trigger: &Ident)
        -> AuditResult<Option<bool>>;

    /// Arguments an installed trigger passes to its function, `None` when it is missing.
    async fn trigger_arguments(
        &self,
        table: &QualifiedName,
        trigger: &Ident,
    ) -> AuditResult<Option<Vec<String>>>;

    /// Relations (as `schema.table`) with a user trigger executing `function`.
    async fn capture_relations(&self, function: &QualifiedName) -> AuditResult<Vec<String>>;

    async fn relation_id(&self, table: &QualifiedName) -> AuditResult<Option<i64>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_same_type() {
        assert!(same_type("jsonb", "jsonb"));
        assert!(same_type("audits.action_type", "action_type"));
        assert!(same_type("audits.action_type", "audits.action_type"));
        assert!(!same_type("jsonb", "json"));
        assert!(!same_type("action_type", "audits.action_type"));
    }

    #[test]
    fn test_display() {
        let table: QualifiedName = "audits.logged_actions".parse().unwrap();
        let function = CatalogObject::Function {
            name: "audits.jsonb_delete_keys".parse().unwrap(),
            args: vec!["jsonb".into(), "text[]".into()],
        };
        assert_eq!(function.to_string(), "function audits.jsonb_delete_keys(jsonb, text[])");
        assert_eq!(function.kind(), "function");
        assert!(function.table().is_none());

        let index = CatalogObject::Index {
            table: table.clone(),
            name: Ident::new("logged_actions_key_type_idx").unwrap(),
        };
        assert_eq!(
            index.to_string(),
            "index logged_actions_key_type_idx on audits.logged_actions"
        );
        assert_eq!(index.table(), Some(&table));
    }
}
