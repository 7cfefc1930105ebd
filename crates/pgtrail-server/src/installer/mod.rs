//! Installer / reconciler
//!
//! Compares the catalog with the objects a tracked table needs and plans the DDL that converges
//! the two. Objects are handled in dependency order:
//!
//! 1. audit schema
//! 2. `action_type` enum
//! 3. changeset table and its indexes
//! 4. audit table and its indexes
//! 5. capture functions
//! 6. row and statement triggers on the tracked table
//!
//! `up` creates only what is missing, and replaces capture triggers whose function arguments no
//! longer match the registration. `down` walks the list backwards, dropping the table's
//! triggers and, once no other relation still runs the capture function, the shared tables and
//! functions. The schema and the enum type are never dropped.

pub mod columns;
pub mod executor;
pub mod migration;
pub mod report;

use crate::catalog::{Catalog, CatalogObject, ColumnInfo};
use crate::ddl::{self, TableTemplate, Template};
use crate::error::{AuditError, AuditResult};
use crate::registry::{AuditNames, EntityRegistry, TrackedEntity};
use columns::ColumnPatch;
use executor::{render_script, CommandExecutor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use executor::{DryRun, PgExecutor};
pub use migration::Migration;
pub use report::{EntityStatus, ObjectStatus, StatusReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl FromStr for Direction {
    type Err = AuditError;

    fn from_str(s: &str) -> AuditResult<Self> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(AuditError::input(format!("Invalid direction: {}", s))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// What a planned command does to its object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Create,
    CreateTable { columns: Vec<ColumnInfo> },
    /// A capture trigger passing `arguments` to the capture function
    CreateTrigger { arguments: Vec<String> },
    Drop,
    AddColumn,
    AlterColumn { from: String },
    DropColumn,
    /// Enable or disable a trigger without dropping it
    SetEnabled(bool),
}

/// One DDL statement with the statement undoing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub object: CatalogObject,
    pub change: Change,
    pub sql: String,
    pub revert: String,
}

impl PlannedCommand {
    fn create(template: &Template) -> Self {
        Self {
            object: template.object.clone(),
            change: Change::Create,
            sql: template.up.clone(),
            revert: template.down.clone(),
        }
    }

    fn create_trigger(template: &Template, arguments: &[String]) -> Self {
        Self {
            change: Change::CreateTrigger {
                arguments: arguments.to_vec(),
            },
            ..Self::create(template)
        }
    }

    fn drop(template: &Template) -> Self {
        Self {
            object: template.object.clone(),
            change: Change::Drop,
            sql: template.down.clone(),
            revert: template.up.clone(),
        }
    }

    fn create_table(table: &TableTemplate) -> Self {
        Self {
            object: table.object(),
            change: Change::CreateTable {
                columns: table
                    .columns
                    .iter()
                    .map(|c| ColumnInfo::new(c.name.as_str(), c.data_type.as_str()))
                    .collect(),
            },
            sql: table.up(),
            revert: table.down(),
        }
    }

    fn drop_table(table: &TableTemplate) -> Self {
        Self {
            object: table.object(),
            change: Change::Drop,
            sql: table.down(),
            revert: table.up(),
        }
    }
}

/// Ordered commands converging the catalog in one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub direction: Direction,
    pub commands: Vec<PlannedCommand>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn statements(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.sql.as_str()).collect()
    }

    pub fn script(&self) -> String {
        render_script(self.commands.iter().map(|c| c.sql.as_str()))
    }

    /// Statements undoing the plan, last command first.
    pub fn revert_script(&self) -> String {
        render_script(self.commands.iter().rev().map(|c| c.revert.as_str()))
    }

    pub async fn apply(&self, executor: &mut dyn CommandExecutor) -> AuditResult<()> {
        for command in &self.commands {
            executor.execute(command).await?;
        }
        tracing::info!(
            direction = %self.direction,
            commands = self.commands.len(),
            "Applied installer plan"
        );
        Ok(())
    }
}

/// Plans DDL for tracked tables against a catalog
pub struct Reconciler<'a> {
    catalog: &'a dyn Catalog,
    names: &'a AuditNames,
    registry: &'a EntityRegistry,
}

impl<'a> Reconciler<'a> {
    pub fn new(catalog: &'a dyn Catalog, names: &'a AuditNames, registry: &'a EntityRegistry) -> Self {
        Self {
            catalog,
            names,
            registry,
        }
    }

    /// Plan for one tracked table, by entity or table name.
    ///
    /// An unregistered table fails before the catalog is consulted.
    pub async fn plan(&self, entity: &str, direction: Direction) -> AuditResult<Plan> {
        let entity = self.registry.resolve(entity)?;

        let commands = match direction {
            Direction::Up => {
                if !self
                    .catalog
                    .exists(&CatalogObject::Table(entity.table.clone()))
                    .await?
                {
                    return Err(AuditError::config(format!(
                        "Tracked table {} of '{}' does not exist",
                        entity.table, entity.name
                    )));
                }
                let mut commands = self.shared_up().await?;
                commands.extend(self.triggers_up(entity).await?);
                commands
            },
            Direction::Down => {
                let mut commands = self.triggers_down(entity).await?;
                let others = self.other_capture_relations(Some(entity)).await?;
                if others.is_empty() {
                    commands.extend(self.shared_down().await?);
                } else {
                    tracing::debug!(
                        entity = %entity.name,
                        relations = ?others,
                        "Keeping shared audit objects still in use"
                    );
                }
                commands
            },
        };

        tracing::debug!(
            entity = %entity.name,
            direction = %direction,
            commands = commands.len(),
            "Planned installer commands"
        );

        Ok(Plan {
            direction,
            commands,
        })
    }

    /// Plan for the shared objects only.
    ///
    /// Tearing them down while any relation still runs the capture function is refused.
    pub async fn plan_shared(&self, direction: Direction) -> AuditResult<Plan> {
        let commands = match direction {
            Direction::Up => self.shared_up().await?,
            Direction::Down => {
                let others = self.other_capture_relations(None).await?;
                if !others.is_empty() {
                    return Err(AuditError::config(format!(
                        "Shared audit objects are still used by: {}",
                        others.join(", ")
                    )));
                }
                self.shared_down().await?
            },
        };

        Ok(Plan {
            direction,
            commands,
        })
    }

    /// Migration installing the table, with the exact inverse as its down script.
    pub async fn migration(&self, entity: &str) -> AuditResult<Migration> {
        let entity = self.registry.resolve(entity)?;
        let plan = self.plan(&entity.name, Direction::Up).await?;
        Ok(Migration {
            entity: entity.name.clone(),
            up: plan.script(),
            down: plan.revert_script(),
            statements: plan.len(),
        })
    }

    pub fn registry(&self) -> &EntityRegistry {
        self.registry
    }

    pub(crate) fn names(&self) -> &AuditNames {
        self.names
    }

    pub(crate) fn catalog(&self) -> &dyn Catalog {
        self.catalog
    }

    async fn shared_up(&self) -> AuditResult<Vec<PlannedCommand>> {
        let mut commands = Vec::new();

        for template in [ddl::schema(self.names), ddl::action_type(self.names)] {
            if !self.catalog.exists(&template.object).await? {
                commands.push(PlannedCommand::create(&template));
            }
        }

        for table in [ddl::changeset_table(self.names)?, ddl::audit_table(self.names)?] {
            commands.extend(self.table_up(&table).await?);
        }

        for template in ddl::functions(self.names) {
            if !self.catalog.exists(&template.object).await? {
                commands.push(PlannedCommand::create(&template));
            }
        }

        Ok(commands)
    }

    async fn table_up(&self, table: &TableTemplate) -> AuditResult<Vec<PlannedCommand>> {
        if !self.catalog.exists(&table.object()).await? {
            let mut commands = vec![PlannedCommand::create_table(table)];
            commands.extend(table.indexes.iter().map(PlannedCommand::create));
            return Ok(commands);
        }

        let actual = self.catalog.columns(&table.name).await?;
        let patch = ColumnPatch::compute(&table.columns, &actual);
        if !patch.is_empty() {
            tracing::info!(
                table = %table.name,
                additions = patch.additions.len(),
                alterations = patch.alterations.len(),
                removals = patch.removals.len(),
                "Audit table columns differ from the expected layout"
            );
        }
        let mut commands = patch.commands(&table.name);

        for index in &table.indexes {
            if !self.catalog.exists(&index.object).await? {
                commands.push(PlannedCommand::create(index));
            }
        }

        Ok(commands)
    }

    async fn shared_down(&self) -> AuditResult<Vec<PlannedCommand>> {
        let mut commands = Vec::new();

        for template in ddl::functions(self.names).iter().rev() {
            if self.catalog.exists(&template.object).await? {
                commands.push(PlannedCommand::drop(template));
            }
        }

        for table in [ddl::audit_table(self.names)?, ddl::changeset_table(self.names)?] {
            if !self.catalog.exists(&table.object()).await? {
                continue;
            }
            for index in table.indexes.iter().rev() {
                if self.catalog.exists(&index.object).await? {
                    commands.push(PlannedCommand::drop(index));
                }
            }
            commands.push(PlannedCommand::drop_table(&table));
        }

        Ok(commands)
    }

    /// Missing triggers are created; installed ones passing other arguments are replaced,
    /// keeping a disabled trigger disabled.
    async fn triggers_up(&self, entity: &TrackedEntity) -> AuditResult<Vec<PlannedCommand>> {
        let arguments = ddl::trigger_arguments(entity);
        let mut commands = Vec::new();

        for template in ddl::triggers(self.names, entity) {
            let CatalogObject::Trigger { table, name } = &template.object else {
                continue;
            };
            let Some(actual) = self.catalog.trigger_arguments(table, name).await? else {
                commands.push(PlannedCommand::create_trigger(&template, &arguments));
                continue;
            };
            if actual == arguments {
                continue;
            }

            tracing::info!(
                table = %table,
                trigger = %name,
                expected = ?arguments,
                actual = ?actual,
                "Capture trigger arguments differ, replacing trigger"
            );
            commands.push(PlannedCommand {
                revert: ddl::create_trigger(self.names, table, name.as_str(), &actual),
                ..PlannedCommand::drop(&template)
            });
            commands.push(PlannedCommand::create_trigger(&template, &arguments));
            if self.catalog.trigger_state(table, name).await? == Some(false) {
                commands.push(PlannedCommand {
                    object: template.object.clone(),
                    change: Change::SetEnabled(false),
                    sql: ddl::toggle_trigger(table, name.as_str(), false),
                    revert: ddl::toggle_trigger(table, name.as_str(), true),
                });
            }
        }
        Ok(commands)
    }

    async fn triggers_down(&self, entity: &TrackedEntity) -> AuditResult<Vec<PlannedCommand>> {
        let mut commands = Vec::new();
        for template in ddl::triggers(self.names, entity).iter().rev() {
            if self.catalog.exists(&template.object).await? {
                commands.push(PlannedCommand::drop(template));
            }
        }
        Ok(commands)
    }

    async fn other_capture_relations(
        &self,
        except: Option<&TrackedEntity>,
    ) -> AuditResult<Vec<String>> {
        let function = ddl::capture_function_name(self.names);
        let except = except.map(|e| e.table.to_string());
        Ok(self
            .catalog
            .capture_relations(&function)
            .await?
            .into_iter()
            .filter(|relation| Some(relation) != except.as_ref())
            .collect())
    }
}
