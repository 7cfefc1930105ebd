use super::{entity_relation, row_records};
use crate::capture::replay::state_after;
use crate::error::AuditResult;
use crate::features::FeatureState;
use crate::resolver::models::{AuditRecord, AuditRow};
use crate::resolver::{query, ActionType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// State of one row as of one audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityVersion {
    pub action_id: i64,
    pub action_type: ActionType,
    pub action_date: DateTime<Utc>,
    /// Set when the record deleted the row; `data` then holds the last state before deletion
    pub deleted: bool,
    pub data: Option<Map<String, Value>>,
}

/// Action ids of every record of one row, oldest first.
#[tracing::instrument(skip(state))]
pub async fn record_version_ids(
    state: &FeatureState,
    entity: &str,
    key: &Value,
) -> AuditResult<Vec<i64>> {
    let (entity, relation_id) = entity_relation(state, entity).await?;
    let key = entity.key_from(key)?;
    let records = row_records(state, relation_id, &key).await?;
    Ok(records.into_iter().map(|r| r.action_id).collect())
}

/// Snapshot of the row touched by `action_id`, replayed up to and including that record.
///
/// `None` when the record does not exist or belongs to another table.
#[tracing::instrument(skip(state))]
pub async fn load_version(
    state: &FeatureState,
    entity: &str,
    action_id: i64,
) -> AuditResult<Option<EntityVersion>> {
    let (entity, relation_id) = entity_relation(state, entity).await?;

    let row: Option<AuditRow> = sqlx::query_as(&query::record_by_id(&state.names))
        .bind(action_id)
        .fetch_optional(&state.db)
        .await?;
    let Some(record) = row.map(AuditRecord::try_from).transpose()? else {
        return Ok(None);
    };
    if record.relation_id != relation_id {
        return Ok(None);
    }

    let Some(key) = record.row_data.as_ref().and_then(|row| entity.key_of(row)) else {
        return Ok(Some(version_of(&record, None)));
    };

    let history = row_records(state, relation_id, &key).await?;
    let data = history
        .iter()
        .take_while(|r| r.action_id <= action_id)
        .fold(None, |_, r| {
            state_after(r.action_type, r.row_data.as_ref(), r.changed_fields.as_ref())
        });

    Ok(Some(version_of(&record, data)))
}

fn version_of(record: &AuditRecord, replayed: Option<Map<String, Value>>) -> EntityVersion {
    let deleted = matches!(record.action_type, ActionType::Delete | ActionType::Truncate);
    EntityVersion {
        action_id: record.action_id,
        action_type: record.action_type,
        action_date: record.action_date,
        deleted,
        data: if deleted {
            record.row_data.clone()
        } else {
            replayed.or_else(|| {
                state_after(
                    record.action_type,
                    record.row_data.as_ref(),
                    record.changed_fields.as_ref(),
                )
            })
        },
    }
}
