use super::{entity_relation, row_records};
use crate::capture::replay::state_after;
use crate::catalog::Catalog;
use crate::error::{AuditError, AuditResult};
use crate::features::FeatureState;
use crate::resolver::models::AuditRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Value of one attribute from one record on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeVersion {
    pub action_id: i64,
    pub action_date: DateTime<Utc>,
    /// `None` once the row is deleted
    pub value: Option<Value>,
}

/// Timeline of one attribute of one row: an entry wherever its value changed.
#[tracing::instrument(skip(state))]
pub async fn attribute_versions(
    state: &FeatureState,
    entity: &str,
    key: &Value,
    attribute: &str,
) -> AuditResult<Vec<AttributeVersion>> {
    let (entity, relation_id) = entity_relation(state, entity).await?;

    if entity.excluded_columns.iter().any(|c| c.as_str() == attribute) {
        return Err(AuditError::input(format!(
            "Attribute '{}' of '{}' is excluded from capture",
            attribute, entity.name
        )));
    }
    let columns = state.catalog().columns(&entity.table).await?;
    if !columns.iter().any(|c| c.name == attribute) {
        return Err(AuditError::input(format!(
            "'{}' has no attribute '{}'",
            entity.name, attribute
        )));
    }

    let key = entity.key_from(key)?;
    let records = row_records(state, relation_id, &key).await?;
    Ok(timeline(&records, attribute))
}

pub(crate) fn timeline(records: &[AuditRecord], attribute: &str) -> Vec<AttributeVersion> {
    let mut versions: Vec<AttributeVersion> = Vec::new();
    for record in records {
        let state = state_after(
            record.action_type,
            record.row_data.as_ref(),
            record.changed_fields.as_ref(),
        );
        let value = state.and_then(|mut row| row.remove(attribute));
        if versions.last().map_or(true, |last| last.value != value) {
            versions.push(AttributeVersion {
                action_id: record.action_id,
                action_date: record.action_date,
                value,
            });
        }
    }
    versions
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resolver::models::{ActionType, KeyType, UnitKey};
    use serde_json::json;

    fn record(action_id: i64, action_type: ActionType, row: Value, changed: Option<Value>) -> AuditRecord {
        AuditRecord {
            action_id,
            schema_name: "public".into(),
            table_name: "posts".into(),
            relation_id: 16384,
            transaction_date: Utc::now(),
            statement_date: Utc::now(),
            action_date: Utc::now(),
            transaction_id: Some(action_id),
            session_user_name: None,
            application_name: None,
            client_addr: None,
            client_port: None,
            query: None,
            action_type,
            row_data: row.as_object().cloned(),
            changed_fields: changed.and_then(|c| c.as_object().cloned()),
            key: UnitKey::new(KeyType::Transaction, action_id),
            changeset_id: None,
            entity: None,
            entity_key: None,
            diff: Vec::new(),
        }
    }

    #[test]
    fn test_timeline_skips_unchanged_values() {
        let records = vec![
            record(1, ActionType::Insert, json!({"id": 1, "title": "a", "views": 0}), None),
            record(2, ActionType::Update, json!({"id": 1, "title": "a", "views": 0}), Some(json!({"views": 3}))),
            record(3, ActionType::Update, json!({"id": 1, "title": "a", "views": 3}), Some(json!({"title": "b"}))),
            record(4, ActionType::Delete, json!({"id": 1, "title": "b", "views": 3}), None),
        ];

        let versions = timeline(&records, "title");
        let ids: Vec<i64> = versions.iter().map(|v| v.action_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert_eq!(versions[0].value, Some(json!("a")));
        assert_eq!(versions[1].value, Some(json!("b")));
        assert_eq!(versions[2].value, None);
    }

    #[test]
    fn test_timeline_of_empty_history() {
        assert!(timeline(&[], "title").is_empty());
    }
}
