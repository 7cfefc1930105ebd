//! Tracked-entity registry and audit object names
//!
//! The registry is the static description of what is under audit: every entity names its table,
//! primary key columns, excluded columns, capture options and the entities whose changes belong
//! in its history (`related`). Nothing is discovered at runtime.

use crate::error::{AuditError, AuditResult};
use pgtrail_common::{Ident, QualifiedName};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Default audit table.
pub const DEFAULT_AUDIT_TABLE: &str = "audits.logged_actions";

/// Default changeset table.
pub const DEFAULT_CHANGESET_TABLE: &str = "audits.changesets";

/// Names of the shared audit objects, all living in one schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditNames {
    audit_table: QualifiedName,
    changeset_table: QualifiedName,
}

impl AuditNames {
    pub fn new(audit_table: QualifiedName, changeset_table: QualifiedName) -> AuditResult<Self> {
        if audit_table.schema() != changeset_table.schema() {
            return Err(AuditError::config(format!(
                "Audit table {} and changeset table {} must be in the same schema",
                audit_table, changeset_table
            )));
        }
        if audit_table == changeset_table {
            return Err(AuditError::config(format!(
                "Audit table and changeset table must differ (both are {})",
                audit_table
            )));
        }
        Ok(Self {
            audit_table,
            changeset_table,
        })
    }

    pub fn parse(audit_table: &str, changeset_table: &str) -> AuditResult<Self> {
        let audit = QualifiedName::parse_with_default(audit_table, "audits")
            .map_err(|e| AuditError::config(e.to_string()))?;
        let changeset = QualifiedName::parse_with_default(changeset_table, "audits")
            .map_err(|e| AuditError::config(e.to_string()))?;
        Self::new(audit, changeset)
    }

    pub fn schema(&self) -> &Ident {
        self.audit_table.schema()
    }

    pub fn audit_table(&self) -> &QualifiedName {
        &self.audit_table
    }

    pub fn changeset_table(&self) -> &QualifiedName {
        &self.changeset_table
    }

    /// Object in the audit schema, e.g. `audits.log_action`.
    pub fn object(&self, name: &str) -> String {
        format!("{}.{}", self.schema(), name)
    }

    /// Sequence created by the audit table's `bigserial` key.
    pub fn action_id_sequence(&self) -> String {
        format!("{}_action_id_seq", self.audit_table)
    }
}

fn default_primary_key() -> Vec<Ident> {
    Ident::new("id").into_iter().collect()
}

/// Capture registration for one tracked table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// Entity type name used by callers, e.g. "post"
    pub name: String,
    pub table: QualifiedName,
    #[serde(default = "default_primary_key")]
    pub primary_key: Vec<Ident>,
    /// Columns stripped from captured rows before diffing
    #[serde(default)]
    pub excluded_columns: Vec<Ident>,
    /// Entities whose changes show up in this entity's history
    #[serde(default)]
    pub related: Vec<String>,
    /// Record the client query text
    #[serde(default)]
    pub log_query: bool,
    /// Record session user, application name and client address
    #[serde(default)]
    pub log_client: bool,
}

impl TrackedEntity {
    pub fn new(name: impl Into<String>, table: QualifiedName) -> Self {
        Self {
            name: name.into(),
            table,
            primary_key: default_primary_key(),
            excluded_columns: Vec::new(),
            related: Vec::new(),
            log_query: false,
            log_client: false,
        }
    }

    /// Normalize a caller-supplied key into the JSON object matched against `row_data`.
    ///
    /// A scalar is accepted for single-column keys.
    pub fn key_from(&self, key: &Value) -> AuditResult<Value> {
        match key {
            Value::Object(map) => {
                let mut out = Map::new();
                for column in &self.primary_key {
                    let value = map.get(column.as_str()).ok_or_else(|| {
                        AuditError::input(format!(
                            "Key for '{}' is missing primary key column '{}'",
                            self.name, column
                        ))
                    })?;
                    out.insert(column.to_string(), value.clone());
                }
                if let Some(extra) = map
                    .keys()
                    .find(|k| !self.primary_key.iter().any(|c| c.as_str() == k.as_str()))
                {
                    return Err(AuditError::input(format!(
                        "Key for '{}' has unknown column '{}'",
                        self.name, extra
                    )));
                }
                Ok(Value::Object(out))
            },
            Value::Null | Value::Array(_) => Err(AuditError::input(format!(
                "Key for '{}' must be a scalar or an object",
                self.name
            ))),
            scalar => match self.primary_key.as_slice() {
                [column] => {
                    let mut out = Map::new();
                    out.insert(column.to_string(), scalar.clone());
                    Ok(Value::Object(out))
                },
                _ => Err(AuditError::input(format!(
                    "'{}' has a composite primary key, pass the key as an object",
                    self.name
                ))),
            },
        }
    }

    /// Extract the primary key object from a captured row.
    pub fn key_of(&self, row: &Map<String, Value>) -> Option<Value> {
        let mut out = Map::new();
        for column in &self.primary_key {
            out.insert(column.to_string(), row.get(column.as_str())?.clone());
        }
        Some(Value::Object(out))
    }
}

/// Lookup of tracked entities by name and by table
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, TrackedEntity>,
    by_table: HashMap<QualifiedName, String>,
}

impl EntityRegistry {
    pub fn new(entities: Vec<TrackedEntity>) -> AuditResult<Self> {
        let mut registry = Self::default();

        for entity in entities {
            if entity.name.trim().is_empty() {
                return Err(AuditError::config(format!(
                    "Entity for table {} has an empty name",
                    entity.table
                )));
            }
            if entity.primary_key.is_empty() {
                return Err(AuditError::config(format!(
                    "Entity '{}' declares no primary key columns",
                    entity.name
                )));
            }
            if let Some(column) = entity
                .primary_key
                .iter()
                .find(|c| entity.excluded_columns.contains(c))
            {
                return Err(AuditError::config(format!(
                    "Entity '{}' excludes its own primary key column '{}'",
                    entity.name, column
                )));
            }
            if let Some(existing) = registry.by_table.get(&entity.table) {
                return Err(AuditError::config(format!(
                    "Table {} is registered twice ('{}' and '{}')",
                    entity.table, existing, entity.name
                )));
            }
            if registry.entities.contains_key(&entity.name) {
                return Err(AuditError::config(format!(
                    "Entity '{}' is registered twice",
                    entity.name
                )));
            }
            registry
                .by_table
                .insert(entity.table.clone(), entity.name.clone());
            registry.entities.insert(entity.name.clone(), entity);
        }

        for entity in registry.entities.values() {
            if let Some(missing) = entity
                .related
                .iter()
                .find(|r| !registry.entities.contains_key(*r))
            {
                return Err(AuditError::config(format!(
                    "Entity '{}' lists unknown related entity '{}'",
                    entity.name, missing
                )));
            }
        }

        Ok(registry)
    }

    /// Registration by entity name. A missing registration is a configuration error.
    pub fn get(&self, name: &str) -> AuditResult<&TrackedEntity> {
        self.entities.get(name).ok_or_else(|| {
            AuditError::config(format!(
                "'{}' has no capture registration; add it to the [[entities]] list",
                name
            ))
        })
    }

    /// Registration by entity name or by table name.
    pub fn resolve(&self, reference: &str) -> AuditResult<&TrackedEntity> {
        if let Some(entity) = self.entities.get(reference) {
            return Ok(entity);
        }
        match reference.parse::<QualifiedName>() {
            Ok(table) => match self.by_table(&table) {
                Some(entity) => Ok(entity),
                None => self.get(reference),
            },
            Err(_) => self.get(reference),
        }
    }

    pub fn by_table(&self, table: &QualifiedName) -> Option<&TrackedEntity> {
        self.by_table
            .get(table)
            .and_then(|name| self.entities.get(name))
    }

    /// The entity followed by its related entities, without duplicates.
    pub fn scope<'a>(&'a self, entity: &'a TrackedEntity) -> Vec<&'a TrackedEntity> {
        let mut scope = vec![entity];
        for name in &entity.related {
            if let Some(related) = self.entities.get(name) {
                if !scope.iter().any(|e| e.name == related.name) {
                    scope.push(related);
                }
            }
        }
        scope
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
