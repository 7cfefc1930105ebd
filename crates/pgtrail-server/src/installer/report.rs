//! Installation status report
//!
//! Every expected object is probed and reported on its own line, so one run shows everything
//! that is missing or out of date rather than stopping at the first gap.

use super::Reconciler;
use crate::catalog::{same_type, CatalogObject};
use crate::ddl::{self, TableTemplate};
use crate::error::AuditResult;
use pgtrail_common::Ident;
use serde::Serialize;

/// Presence of one expected object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectStatus {
    pub kind: &'static str,
    pub name: String,
    pub present: bool,
    /// How an existing object differs from what `install` would leave in place
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<String>,
}

impl ObjectStatus {
    fn existing(kind: &'static str, name: String, mismatch: Option<String>) -> Self {
        Self {
            kind,
            name,
            present: true,
            mismatch,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.present && self.mismatch.is_none()
    }
}

/// Triggers and tracking state of one tracked table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityStatus {
    pub entity: String,
    pub table: String,
    pub table_exists: bool,
    pub triggers: Vec<ObjectStatus>,
    /// `None` when the row trigger is not installed
    pub tracking: Option<bool>,
}

impl EntityStatus {
    pub fn is_installed(&self) -> bool {
        self.table_exists && self.triggers.iter().all(ObjectStatus::is_ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub shared: Vec<ObjectStatus>,
    pub entities: Vec<EntityStatus>,
}

impl StatusReport {
    pub fn missing(&self) -> impl Iterator<Item = &ObjectStatus> {
        self.shared.iter().filter(|o| !o.present).chain(
            self.entities
                .iter()
                .flat_map(|e| e.triggers.iter().filter(|t| !t.present)),
        )
    }

    /// Existing objects `install` would alter, replace or drop.
    pub fn mismatched(&self) -> impl Iterator<Item = &ObjectStatus> {
        self.shared.iter().filter(|o| o.mismatch.is_some()).chain(
            self.entities
                .iter()
                .flat_map(|e| e.triggers.iter().filter(|t| t.mismatch.is_some())),
        )
    }

    pub fn is_complete(&self) -> bool {
        self.missing().next().is_none()
            && self.mismatched().next().is_none()
            && self.entities.iter().all(|e| e.table_exists)
    }
}

impl Reconciler<'_> {
    /// Probe shared objects and every registered table.
    pub async fn report(&self) -> AuditResult<StatusReport> {
        let names = self.names();
        let mut shared = Vec::new();

        for template in [ddl::schema(names), ddl::action_type(names)] {
            shared.push(self.probe(&template.object).await?);
        }
        for table in [ddl::changeset_table(names)?, ddl::audit_table(names)?] {
            shared.extend(self.probe_table(&table).await?);
        }
        for template in ddl::functions(names) {
            shared.push(self.probe(&template.object).await?);
        }

        let mut entities = Vec::new();
        for entity in self.registry().iter() {
            let table_exists = self
                .catalog()
                .exists(&CatalogObject::Table(entity.table.clone()))
                .await?;

            let arguments = ddl::trigger_arguments(entity);
            let mut triggers = Vec::new();
            for template in ddl::triggers(names, entity) {
                triggers.push(self.trigger_status(&template.object, &arguments).await?);
            }

            let tracking = self
                .catalog()
                .trigger_state(&entity.table, &Ident::from_static(ddl::ROW_TRIGGER))
                .await?;

            entities.push(EntityStatus {
                entity: entity.name.clone(),
                table: entity.table.to_string(),
                table_exists,
                triggers,
                tracking,
            });
        }

        Ok(StatusReport { shared, entities })
    }

    async fn probe(&self, object: &CatalogObject) -> AuditResult<ObjectStatus> {
        Ok(ObjectStatus {
            kind: object.kind(),
            name: object_name(object),
            present: self.catalog().exists(object).await?,
            mismatch: None,
        })
    }

    async fn trigger_status(
        &self,
        object: &CatalogObject,
        expected: &[String],
    ) -> AuditResult<ObjectStatus> {
        let CatalogObject::Trigger { table, name } = object else {
            return self.probe(object).await;
        };
        let status = match self.catalog().trigger_arguments(table, name).await? {
            None => ObjectStatus {
                kind: object.kind(),
                name: object_name(object),
                present: false,
                mismatch: None,
            },
            Some(actual) => {
                let mismatch = (actual != expected).then(|| {
                    format!(
                        "passes ({}), expected ({})",
                        actual.join(", "),
                        expected.join(", ")
                    )
                });
                ObjectStatus::existing(object.kind(), object_name(object), mismatch)
            },
        };
        Ok(status)
    }

    /// The table, then each column and index when the table exists.
    ///
    /// Columns with another type, and columns outside the layout, are reported as mismatched.
    async fn probe_table(&self, table: &TableTemplate) -> AuditResult<Vec<ObjectStatus>> {
        let status = self.probe(&table.object()).await?;
        if !status.present {
            return Ok(vec![status]);
        }

        let actual = self.catalog().columns(&table.name).await?;
        let mut statuses = vec![status];
        for column in &table.columns {
            let object = CatalogObject::Column {
                table: table.name.clone(),
                name: column.name.clone(),
                data_type: column.data_type.clone(),
            };
            let status = match actual.iter().find(|c| c.name == column.name.as_str()) {
                None => ObjectStatus {
                    kind: object.kind(),
                    name: object_name(&object),
                    present: false,
                    mismatch: None,
                },
                Some(found) => {
                    let mismatch = (!same_type(&column.data_type, &found.data_type))
                        .then(|| format!("has type {}", found.data_type));
                    ObjectStatus::existing(object.kind(), object_name(&object), mismatch)
                },
            };
            statuses.push(status);
        }

        for extra in actual
            .iter()
            .filter(|c| !table.columns.iter().any(|d| d.name.as_str() == c.name))
        {
            statuses.push(ObjectStatus::existing(
                "column",
                format!("{}.{} ({})", table.name, extra.name, extra.data_type),
                Some("not part of the audit table, dropped on install".to_string()),
            ));
        }

        for index in &table.indexes {
            statuses.push(self.probe(&index.object).await?);
        }
        Ok(statuses)
    }
}

fn object_name(object: &CatalogObject) -> String {
    match object {
        CatalogObject::Schema(name) => name.to_string(),
        CatalogObject::EnumType(name) | CatalogObject::Table(name) => name.to_string(),
        CatalogObject::Function { name, args } => format!("{}({})", name, args.join(", ")),
        CatalogObject::Column {
            table,
            name,
            data_type,
        } => format!("{}.{} ({})", table, name, data_type),
        CatalogObject::Index { table, name } | CatalogObject::Trigger { table, name } => {
            format!("{} on {}", name, table)
        },
    }
}
