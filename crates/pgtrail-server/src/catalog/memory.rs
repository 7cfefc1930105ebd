//! In-memory catalog
//!
//! Holds catalog state in plain collections and applies installer commands to it. Used to plan
//! full scripts without a database (`pgtrail sql`) and to exercise the reconciler in tests.

use super::{same_type, Catalog, CatalogObject, ColumnInfo};
use crate::error::{AuditError, AuditResult};
use crate::installer::{executor::CommandExecutor, Change, PlannedCommand};
use async_trait::async_trait;
use pgtrail_common::{Ident, QualifiedName};
use std::collections::{BTreeMap, HashMap, HashSet};

/// First relation id handed out, mirroring `FirstNormalObjectId`.
const FIRST_RELATION_ID: i64 = 16384;

#[derive(Debug, Clone)]
struct TableState {
    relation_id: i64,
    columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    tables: BTreeMap<QualifiedName, TableState>,
    objects: HashSet<CatalogObject>,
    disabled_triggers: HashSet<(QualifiedName, Ident)>,
    trigger_arguments: HashMap<(QualifiedName, Ident), Vec<String>>,
    next_relation_id: i64,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            objects: HashSet::new(),
            disabled_triggers: HashSet::new(),
            trigger_arguments: HashMap::new(),
            next_relation_id: FIRST_RELATION_ID,
        }
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: QualifiedName, columns: Vec<ColumnInfo>) {
        let relation_id = self.next_relation_id;
        self.next_relation_id += 1;
        self.tables.insert(
            table,
            TableState {
                relation_id,
                columns,
            },
        );
    }

    pub fn add_column(&mut self, table: &QualifiedName, column: ColumnInfo) {
        if let Some(state) = self.tables.get_mut(table) {
            state.columns.push(column);
        }
    }

    pub fn drop_column(&mut self, table: &QualifiedName, column: &str) {
        if let Some(state) = self.tables.get_mut(table) {
            state.columns.retain(|c| c.name != column);
        }
    }

    pub fn set_trigger_enabled(&mut self, table: &QualifiedName, trigger: &Ident, enabled: bool) {
        let key = (table.clone(), trigger.clone());
        if enabled {
            self.disabled_triggers.remove(&key);
        } else {
            self.disabled_triggers.insert(key);
        }
    }

    fn table_mut(&mut self, table: &QualifiedName) -> AuditResult<&mut TableState> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| AuditError::input(format!("relation {} does not exist", table)))
    }

    fn apply(&mut self, command: &PlannedCommand) -> AuditResult<()> {
        let object = &command.object;
        match (&command.change, object) {
            (Change::CreateTable { columns }, CatalogObject::Table(table)) => {
                if self.tables.contains_key(table) {
                    return Err(already_exists(object));
                }
                self.add_table(table.clone(), columns.clone());
            },
            (Change::Create, CatalogObject::Table(table)) => {
                if self.tables.contains_key(table) {
                    return Err(already_exists(object));
                }
                self.add_table(table.clone(), Vec::new());
            },
            (Change::CreateTrigger { arguments }, CatalogObject::Trigger { table, name }) => {
                self.table_mut(table)?;
                if !self.objects.insert(object.clone()) {
                    return Err(already_exists(object));
                }
                self.trigger_arguments
                    .insert((table.clone(), name.clone()), arguments.clone());
            },
            (Change::Create, _) => {
                if let Some(table) = object.table() {
                    self.table_mut(table)?;
                }
                if !self.objects.insert(object.clone()) {
                    return Err(already_exists(object));
                }
            },
            (Change::Drop, CatalogObject::Table(table)) => {
                if self.tables.remove(table).is_none() {
                    return Err(does_not_exist(object));
                }
                self.objects.retain(|o| o.table() != Some(table));
                self.disabled_triggers.retain(|(t, _)| t != table);
                self.trigger_arguments.retain(|(t, _), _| t != table);
            },
            (Change::Drop, _) => {
                if !self.objects.remove(object) {
                    return Err(does_not_exist(object));
                }
                if let CatalogObject::Trigger { table, name } = object {
                    let key = (table.clone(), name.clone());
                    self.disabled_triggers.remove(&key);
                    self.trigger_arguments.remove(&key);
                }
            },
            (
                Change::AddColumn,
                CatalogObject::Column {
                    table,
                    name,
                    data_type,
                },
            ) => {
                let state = self.table_mut(table)?;
                if state.columns.iter().any(|c| c.name == name.as_str()) {
                    return Err(already_exists(object));
                }
                state.columns.push(ColumnInfo::new(name.as_str(), data_type.as_str()));
            },
            (
                Change::AlterColumn { .. },
                CatalogObject::Column {
                    table,
                    name,
                    data_type,
                },
            ) => {
                let state = self.table_mut(table)?;
                let column = state
                    .columns
                    .iter_mut()
                    .find(|c| c.name == name.as_str())
                    .ok_or_else(|| does_not_exist(object))?;
                column.data_type = data_type.clone();
            },
            (Change::DropColumn, CatalogObject::Column { table, name, .. }) => {
                let state = self.table_mut(table)?;
                let before = state.columns.len();
                state.columns.retain(|c| c.name != name.as_str());
                if state.columns.len() == before {
                    return Err(does_not_exist(object));
                }
            },
            (Change::SetEnabled(enabled), CatalogObject::Trigger { table, name }) => {
                if !self.objects.contains(object) {
                    return Err(does_not_exist(object));
                }
                self.set_trigger_enabled(table, name, *enabled);
            },
            (change, object) => {
                return Err(AuditError::input(format!(
                    "Cannot apply {:?} to {}",
                    change, object
                )));
            },
        }
        Ok(())
    }
}

fn already_exists(object: &CatalogObject) -> AuditError {
    AuditError::input(format!("{} already exists", object))
}

fn does_not_exist(object: &CatalogObject) -> AuditError {
    AuditError::input(format!("{} does not exist", object))
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn exists(&self, object: &CatalogObject) -> AuditResult<bool> {
        Ok(match object {
            CatalogObject::Table(table) => self.tables.contains_key(table),
            CatalogObject::Column {
                table,
                name,
                data_type,
            } => self.tables.get(table).is_some_and(|state| {
                state
                    .columns
                    .iter()
                    .any(|c| c.name == name.as_str() && same_type(data_type, &c.data_type))
            }),
            _ => self.objects.contains(object),
        })
    }

    async fn columns(&self, table: &QualifiedName) -> AuditResult<Vec<ColumnInfo>> {
        Ok(self
            .tables
            .get(table)
            .map(|state| state.columns.clone())
            .unwrap_or_default())
    }

    async fn trigger_state(
        &self,
        table: &QualifiedName,
        trigger: &Ident,
    ) -> AuditResult<Option<bool>> {
        let object = CatalogObject::Trigger {
            table: table.clone(),
            name: trigger.clone(),
        };
        if !self.objects.contains(&object) {
            return Ok(None);
        }
        Ok(Some(
            !self
                .disabled_triggers
                .contains(&(table.clone(), trigger.clone())),
        ))
    }

    /// Triggers created without arguments report an empty list.
    async fn trigger_arguments(
        &self,
        table: &QualifiedName,
        trigger: &Ident,
    ) -> AuditResult<Option<Vec<String>>> {
        let object = CatalogObject::Trigger {
            table: table.clone(),
            name: trigger.clone(),
        };
        if !self.objects.contains(&object) {
            return Ok(None);
        }
        Ok(Some(
            self.trigger_arguments
                .get(&(table.clone(), trigger.clone()))
                .cloned()
                .unwrap_or_default(),
        ))
    }

    /// Every table with a trigger; only capture triggers are ever created here.
    async fn capture_relations(&self, _function: &QualifiedName) -> AuditResult<Vec<String>> {
        let mut relations: Vec<String> = self
            .objects
            .iter()
            .filter_map(|o| match o {
                CatalogObject::Trigger { table, .. } => Some(table.to_string()),
                _ => None,
            })
            .collect();
        relations.sort();
        relations.dedup();
        Ok(relations)
    }

    async fn relation_id(&self, table: &QualifiedName) -> AuditResult<Option<i64>> {
        Ok(self.tables.get(table).map(|state| state.relation_id))
    }
}

#[async_trait]
impl CommandExecutor for MemoryCatalog {
    async fn execute(&mut self, command: &PlannedCommand) -> AuditResult<()> {
        self.apply(command)
    }
}
