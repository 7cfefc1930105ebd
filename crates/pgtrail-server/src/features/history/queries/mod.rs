//! Read-only history queries
//!
//! Every query is idempotent. Unknown entities and attributes are errors; empty histories are
//! empty results.

pub mod attributes;
pub mod history;
pub mod versions;

pub use attributes::{attribute_versions, AttributeVersion};
pub use history::{history, HistoryQuery};
pub use versions::{load_version, record_version_ids, EntityVersion};

use crate::catalog::Catalog;
use crate::error::{AuditError, AuditResult};
use crate::features::FeatureState;
use crate::registry::TrackedEntity;
use crate::resolver::models::{AuditRecord, AuditRow};
use crate::resolver::query;
use serde_json::Value;

/// Registration and relation id of an entity.
pub(crate) async fn entity_relation(
    state: &FeatureState,
    entity: &str,
) -> AuditResult<(TrackedEntity, i64)> {
    let entity = state.registry.resolve(entity)?.clone();
    let relation_id = state
        .catalog()
        .relation_id(&entity.table)
        .await?
        .ok_or_else(|| {
            AuditError::config(format!(
                "Table {} of entity '{}' does not exist",
                entity.table, entity.name
            ))
        })?;
    Ok((entity, relation_id))
}

/// Every record of one row, in action-id order.
pub(crate) async fn row_records(
    state: &FeatureState,
    relation_id: i64,
    key: &Value,
) -> AuditResult<Vec<AuditRecord>> {
    let rows: Vec<AuditRow> = sqlx::query_as(&query::row_records(&state.names))
        .bind(relation_id)
        .bind(key)
        .fetch_all(&state.db)
        .await?;
    rows.into_iter().map(AuditRecord::try_from).collect()
}
