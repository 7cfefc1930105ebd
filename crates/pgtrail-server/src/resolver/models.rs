//! Audit records and units of work

use crate::capture::replay::AttributeChange;
use crate::error::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Which identifier groups a record into its unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "c")]
    Changeset,
    #[serde(rename = "t")]
    Transaction,
    #[serde(rename = "a")]
    Action,
}

impl KeyType {
    pub fn code(&self) -> &'static str {
        match self {
            KeyType::Changeset => "c",
            KeyType::Transaction => "t",
            KeyType::Action => "a",
        }
    }
}

impl FromStr for KeyType {
    type Err = AuditError;

    fn from_str(s: &str) -> AuditResult<Self> {
        match s.trim() {
            "c" => Ok(KeyType::Changeset),
            "t" => Ok(KeyType::Transaction),
            "a" => Ok(KeyType::Action),
            other => Err(AuditError::input(format!("Unknown key type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Insert,
    Select,
    Update,
    Delete,
    Truncate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Insert => "INSERT",
            ActionType::Select => "SELECT",
            ActionType::Update => "UPDATE",
            ActionType::Delete => "DELETE",
            ActionType::Truncate => "TRUNCATE",
        }
    }
}

impl FromStr for ActionType {
    type Err = AuditError;

    fn from_str(s: &str) -> AuditResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "INSERT" => Ok(ActionType::Insert),
            "SELECT" => Ok(ActionType::Select),
            "UPDATE" => Ok(ActionType::Update),
            "DELETE" => Ok(ActionType::Delete),
            "TRUNCATE" => Ok(ActionType::Truncate),
            other => Err(AuditError::input(format!("Unknown action type '{}'", other))),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a unit of work: a changeset, a transaction or a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub key_type: KeyType,
    pub id: i64,
}

impl UnitKey {
    pub fn new(key_type: KeyType, id: i64) -> Self {
        Self { key_type, id }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_type.code(), self.id)
    }
}

/// Audit table row as selected by the resolver queries
#[derive(Debug, Clone, FromRow)]
pub struct AuditRow {
    pub action_id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub relation_id: i64,
    pub transaction_date: DateTime<Utc>,
    pub statement_date: DateTime<Utc>,
    pub action_date: DateTime<Utc>,
    pub transaction_id: Option<i64>,
    pub session_user_name: Option<String>,
    pub application_name: Option<String>,
    pub client_addr: Option<String>,
    pub client_port: Option<i32>,
    pub query: Option<String>,
    pub action_type: String,
    pub row_data: Option<Value>,
    pub changed_fields: Option<Value>,
    pub statement_only: bool,
    pub key_type: String,
    pub changeset_id: Option<i32>,
    pub unit_id: i64,
}

/// One captured action with its diff against the previous state of the same row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub action_id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub relation_id: i64,
    pub transaction_date: DateTime<Utc>,
    pub statement_date: DateTime<Utc>,
    pub action_date: DateTime<Utc>,
    pub transaction_id: Option<i64>,
    pub session_user_name: Option<String>,
    pub application_name: Option<String>,
    pub client_addr: Option<String>,
    pub client_port: Option<i32>,
    pub query: Option<String>,
    pub action_type: ActionType,
    pub row_data: Option<Map<String, Value>>,
    pub changed_fields: Option<Map<String, Value>>,
    pub key: UnitKey,
    pub changeset_id: Option<i32>,
    /// Registered entity of the table, if any
    pub entity: Option<String>,
    /// Primary key of the affected row, for registered entities
    pub entity_key: Option<Value>,
    pub diff: Vec<AttributeChange>,
}

impl AuditRecord {
    /// `schema.table` of the captured relation.
    pub fn table(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = AuditError;

    fn try_from(row: AuditRow) -> AuditResult<Self> {
        Ok(Self {
            key: UnitKey::new(row.key_type.parse()?, row.unit_id),
            action_type: row.action_type.parse()?,
            row_data: into_object(row.row_data, "row_data", row.action_id)?,
            changed_fields: into_object(row.changed_fields, "changed_fields", row.action_id)?,
            action_id: row.action_id,
            schema_name: row.schema_name,
            table_name: row.table_name,
            relation_id: row.relation_id,
            transaction_date: row.transaction_date,
            statement_date: row.statement_date,
            action_date: row.action_date,
            transaction_id: row.transaction_id,
            session_user_name: row.session_user_name,
            application_name: row.application_name,
            client_addr: row.client_addr,
            client_port: row.client_port,
            query: row.query,
            changeset_id: row.changeset_id,
            entity: None,
            entity_key: None,
            diff: Vec::new(),
        })
    }
}

pub(crate) fn into_object(
    value: Option<Value>,
    column: &str,
    action_id: i64,
) -> AuditResult<Option<Map<String, Value>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(AuditError::input(format!(
            "Audit record {} has a non-object {}",
            action_id, column
        ))),
    }
}

/// Request metadata of a changeset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct ChangesetInfo {
    pub id: i32,
    pub transaction_id: Option<i64>,
    pub user_id: Option<i32>,
    pub session_id: Option<String>,
    pub request_date: DateTime<Utc>,
    pub request_url: Option<String>,
    pub request_addr: Option<String>,
}

/// Everything that happened as one logical operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitOfWork {
    pub key: UnitKey,
    pub changeset: Option<ChangesetInfo>,
    /// Changeset request date, or the first action's date without a changeset
    pub request_date: DateTime<Utc>,
    /// Ordered by action date, ties broken by action id
    pub actions: Vec<AuditRecord>,
}
