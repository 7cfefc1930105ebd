//! Column patch for an existing audit table

use super::{Change, PlannedCommand};
use crate::catalog::{same_type, CatalogObject, ColumnInfo};
use crate::ddl::ColumnDef;
use pgtrail_common::{Ident, QualifiedName};

/// Differences between the expected and actual columns of a table.
///
/// The three sets are disjoint: a column is added, altered, removed, or left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPatch {
    pub additions: Vec<ColumnDef>,
    /// Expected column with the type it currently has
    pub alterations: Vec<(ColumnDef, String)>,
    pub removals: Vec<ColumnInfo>,
}

impl ColumnPatch {
    pub fn compute(expected: &[ColumnDef], actual: &[ColumnInfo]) -> Self {
        let mut patch = Self::default();

        for column in expected {
            match actual.iter().find(|a| a.name == column.name.as_str()) {
                None => patch.additions.push(column.clone()),
                Some(existing) if !same_type(&column.data_type, &existing.data_type) => patch
                    .alterations
                    .push((column.clone(), existing.data_type.clone())),
                Some(_) => {},
            }
        }

        patch.removals = actual
            .iter()
            .filter(|a| !expected.iter().any(|c| c.name.as_str() == a.name))
            .cloned()
            .collect();

        patch
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.alterations.is_empty() && self.removals.is_empty()
    }

    /// Commands applying the patch; each revert restores the prior column and type.
    ///
    /// Removed columns that are not valid identifiers cannot be named safely and are skipped
    /// with a warning.
    pub fn commands(&self, table: &QualifiedName) -> Vec<PlannedCommand> {
        let mut commands = Vec::new();

        for column in &self.additions {
            commands.push(PlannedCommand {
                object: column_object(table, column.name.clone(), &column.data_type),
                change: Change::AddColumn,
                sql: format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table, column.name, column.definition
                ),
                revert: format!("ALTER TABLE {} DROP COLUMN {}", table, column.name),
            });
        }

        for (column, from) in &self.alterations {
            commands.push(PlannedCommand {
                object: column_object(table, column.name.clone(), &column.data_type),
                change: Change::AlterColumn { from: from.clone() },
                sql: alter_type(table, &column.name, &column.data_type),
                revert: alter_type(table, &column.name, from),
            });
        }

        for column in &self.removals {
            let name = match Ident::new(column.name.as_str()) {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!(
                        table = %table,
                        column = %column.name,
                        error = %e,
                        "Skipping removal of column with unsupported name"
                    );
                    continue;
                },
            };
            commands.push(PlannedCommand {
                sql: format!("ALTER TABLE {} DROP COLUMN {}", table, name),
                revert: format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table, name, column.data_type
                ),
                object: column_object(table, name, &column.data_type),
                change: Change::DropColumn,
            });
        }

        commands
    }
}

fn column_object(table: &QualifiedName, name: Ident, data_type: &str) -> CatalogObject {
    CatalogObject::Column {
        table: table.clone(),
        name,
        data_type: data_type.to_string(),
    }
}

fn alter_type(table: &QualifiedName, column: &Ident, data_type: &str) -> String {
    format!(
        "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
        table, column, data_type, column, data_type
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn def(name: &str, data_type: &str) -> ColumnDef {
        ColumnDef {
            name: Ident::new(name).unwrap(),
            data_type: data_type.to_string(),
            definition: format!("{} NOT NULL", data_type),
        }
    }

    fn table() -> QualifiedName {
        "audits.logged_actions".parse().unwrap()
    }

    #[test]
    fn test_sets_are_disjoint() {
        let expected = vec![
            def("action_id", "bigint"),
            def("row_data", "jsonb"),
            def("key_type", "character(1)"),
            def("action_type", "audits.action_type"),
        ];
        let actual = vec![
            ColumnInfo::new("action_id", "bigint"),
            ColumnInfo::new("row_data", "json"),
            ColumnInfo::new("action_type", "action_type"),
            ColumnInfo::new("legacy", "text"),
        ];

        let patch = ColumnPatch::compute(&expected, &actual);

        assert_eq!(patch.additions, vec![def("key_type", "character(1)")]);
        assert_eq!(
            patch.alterations,
            vec![(def("row_data", "jsonb"), "json".to_string())]
        );
        assert_eq!(patch.removals, vec![ColumnInfo::new("legacy", "text")]);
    }

    #[test]
    fn test_matching_columns_yield_empty_patch() {
        let expected = vec![def("action_id", "bigint")];
        let actual = vec![ColumnInfo::new("action_id", "bigint")];
        let patch = ColumnPatch::compute(&expected, &actual);
        assert!(patch.is_empty());
        assert!(patch.commands(&table()).is_empty());
    }

    #[test]
    fn test_reverts_remember_prior_types() {
        let patch = ColumnPatch::compute(
            &[def("row_data", "jsonb")],
            &[
                ColumnInfo::new("row_data", "json"),
                ColumnInfo::new("legacy", "character varying(20)"),
            ],
        );
        let commands = patch.commands(&table());

        assert_eq!(
            commands[0].sql,
            "ALTER TABLE audits.logged_actions ALTER COLUMN row_data TYPE jsonb USING row_data::jsonb"
        );
        assert_eq!(
            commands[0].revert,
            "ALTER TABLE audits.logged_actions ALTER COLUMN row_data TYPE json USING row_data::json"
        );
        assert_eq!(
            commands[1].sql,
            "ALTER TABLE audits.logged_actions DROP COLUMN legacy"
        );
        assert_eq!(
            commands[1].revert,
            "ALTER TABLE audits.logged_actions ADD COLUMN legacy character varying(20)"
        );
    }

    #[test]
    fn test_unsupported_column_names_are_not_dropped() {
        let patch = ColumnPatch::compute(&[], &[ColumnInfo::new("LegacyCol", "text")]);
        assert_eq!(patch.removals.len(), 1);
        assert!(patch.commands(&table()).is_empty());
    }
}
