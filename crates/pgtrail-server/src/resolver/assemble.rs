//! Unit assembly and per-record diffs

use super::models::{into_object, ActionType, AuditRecord, ChangesetInfo, KeyType, UnitKey, UnitOfWork};
use super::query;
use crate::capture::replay::{diff, state_after};
use crate::error::AuditResult;
use crate::registry::{AuditNames, EntityRegistry};
use async_trait::async_trait;
use pgtrail_common::{Ident, QualifiedName};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;

type Row = Map<String, Value>;

/// State of a row before a record, looked up outside the current page
#[async_trait]
pub trait PriorState: Send + Sync {
    /// Row state after the nearest record of the same row with a smaller action id.
    async fn state_before(&self, relation_id: i64, key: &Value, action_id: i64)
        -> AuditResult<Option<Row>>;
}

/// [`PriorState`] backed by the audit table
pub struct PgPriorState<'a> {
    pool: &'a PgPool,
    sql: String,
}

impl<'a> PgPriorState<'a> {
    pub fn new(pool: &'a PgPool, names: &AuditNames) -> Self {
        Self {
            pool,
            sql: query::previous_record(names),
        }
    }
}

#[async_trait]
impl PriorState for PgPriorState<'_> {
    async fn state_before(
        &self,
        relation_id: i64,
        key: &Value,
        action_id: i64,
    ) -> AuditResult<Option<Row>> {
        let previous: Option<(String, Option<Value>, Option<Value>)> = sqlx::query_as(&self.sql)
            .bind(relation_id)
            .bind(key)
            .bind(action_id)
            .fetch_optional(self.pool)
            .await?;

        let Some((action_type, row_data, changed_fields)) = previous else {
            return Ok(None);
        };
        let action_type: ActionType = action_type.parse()?;
        let row_data = into_object(row_data, "row_data", action_id)?;
        let changed_fields = into_object(changed_fields, "changed_fields", action_id)?;
        Ok(state_after(action_type, row_data.as_ref(), changed_fields.as_ref()))
    }
}

fn table_of(record: &AuditRecord) -> Option<QualifiedName> {
    Some(QualifiedName::new(
        Ident::new(record.schema_name.as_str()).ok()?,
        Ident::new(record.table_name.as_str()).ok()?,
    ))
}

/// Fill in entity, entity key and diff of every record.
///
/// Records are walked in action-id order. The baseline of a record is the state left by the
/// previous record of the same row in this batch, else the nearest earlier record in the audit
/// table, else its own `row_data`. INSERTs always diff against nothing.
pub async fn attach_diffs(
    records: &mut [AuditRecord],
    registry: &EntityRegistry,
    prior: &dyn PriorState,
) -> AuditResult<()> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by_key(|&i| records[i].action_id);

    let mut states: HashMap<(i64, String), Option<Row>> = HashMap::new();

    for i in order {
        let record = &mut records[i];
        let entity = table_of(record).and_then(|table| registry.by_table(&table));
        let key = entity.and_then(|e| record.row_data.as_ref().and_then(|row| e.key_of(row)));

        record.entity = entity.map(|e| e.name.clone());
        record.entity_key = key.clone();

        let after = state_after(
            record.action_type,
            record.row_data.as_ref(),
            record.changed_fields.as_ref(),
        );

        let before = match (&key, record.action_type) {
            (_, ActionType::Insert) => None,
            (None, _) => record.row_data.clone(),
            (Some(key), _) => match states.get(&(record.relation_id, key.to_string())) {
                Some(state) => state.clone(),
                None => match prior
                    .state_before(record.relation_id, key, record.action_id)
                    .await?
                {
                    Some(state) => Some(state),
                    None => record.row_data.clone(),
                },
            },
        };

        record.diff = diff(before.as_ref(), after.as_ref());

        if let Some(entity) = entity {
            let next_key = after.as_ref().and_then(|row| entity.key_of(row)).or(key);
            if let Some(next_key) = next_key {
                states.insert((record.relation_id, next_key.to_string()), after);
            }
        }
    }

    Ok(())
}

/// Group records into units, in page order.
///
/// Keys without records are dropped.
pub fn assemble_units(
    keys: &[UnitKey],
    changesets: &HashMap<i32, ChangesetInfo>,
    records: Vec<AuditRecord>,
) -> Vec<UnitOfWork> {
    let mut groups: HashMap<UnitKey, Vec<AuditRecord>> = HashMap::new();
    for record in records {
        groups.entry(record.key).or_default().push(record);
    }

    keys.iter()
        .filter_map(|key| {
            let mut actions = groups.remove(key)?;
            actions.sort_by(|a, b| {
                a.action_date
                    .cmp(&b.action_date)
                    .then(a.action_id.cmp(&b.action_id))
            });
            let first = actions.first()?;

            let changeset_id = match key.key_type {
                KeyType::Changeset => i32::try_from(key.id).ok(),
                _ => first.changeset_id,
            };
            let changeset = changeset_id.and_then(|id| changesets.get(&id)).cloned();
            let request_date = changeset
                .as_ref()
                .map(|c| c.request_date)
                .unwrap_or(first.action_date);

            Some(UnitOfWork {
                key: *key,
                changeset,
                request_date,
                actions,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::TrackedEntity;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubPrior {
        state: Option<Row>,
        calls: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl PriorState for StubPrior {
        async fn state_before(&self, _: i64, _: &Value, action_id: i64) -> AuditResult<Option<Row>> {
            self.calls.lock().unwrap().push(action_id);
            Ok(self.state.clone())
        }
    }

    fn obj(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    fn registry() -> EntityRegistry {
        EntityRegistry::new(vec![TrackedEntity::new(
            "post",
            "public.posts".parse().unwrap(),
        )])
        .unwrap()
    }

    fn record(
        action_id: i64,
        action_type: ActionType,
        row_data: Value,
        changed: Option<Value>,
        key: UnitKey,
    ) -> AuditRecord {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(action_id);
        AuditRecord {
            action_id,
            schema_name: "public".into(),
            table_name: "posts".into(),
            relation_id: 16384,
            transaction_date: date,
            statement_date: date,
            action_date: date,
            transaction_id: Some(700),
            session_user_name: None,
            application_name: None,
            client_addr: None,
            client_port: None,
            query: None,
            action_type,
            row_data: Some(obj(row_data)),
            changed_fields: changed.map(obj),
            key,
            changeset_id: None,
            entity: None,
            entity_key: None,
            diff: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_diffs_chain_within_page() {
        let key = UnitKey::new(KeyType::Transaction, 700);
        let mut records = vec![
            record(2, ActionType::Update, json!({"id": 1, "title": "a"}), Some(json!({"title": "b"})), key),
            record(1, ActionType::Insert, json!({"id": 1, "title": "a"}), None, key),
        ];
        let prior = StubPrior::default();

        attach_diffs(&mut records, &registry(), &prior).await.unwrap();

        let insert = &records[1];
        assert_eq!(insert.entity.as_deref(), Some("post"));
        assert_eq!(insert.entity_key, Some(json!({"id": 1})));
        assert_eq!(insert.diff.len(), 2);
        assert!(insert.diff.iter().all(|c| c.old.is_none()));

        let update = &records[0];
        assert_eq!(update.diff.len(), 1);
        assert_eq!(update.diff[0].attribute, "title");
        assert_eq!(update.diff[0].old, Some(json!("a")));
        assert_eq!(update.diff[0].new, Some(json!("b")));
        assert!(prior.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_page_lookup() {
        let key = UnitKey::new(KeyType::Action, 9);
        let mut records = vec![record(
            9,
            ActionType::Delete,
            json!({"id": 1, "title": "b"}),
            None,
            key,
        )];
        let prior = StubPrior {
            state: Some(obj(json!({"id": 1, "title": "b"}))),
            ..Default::default()
        };

        attach_diffs(&mut records, &registry(), &prior).await.unwrap();

        assert_eq!(*prior.calls.lock().unwrap(), vec![9]);
        let changes = &records[0].diff;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.new.is_none()));
    }

    #[tokio::test]
    async fn test_unregistered_table_has_no_entity() {
        let key = UnitKey::new(KeyType::Action, 3);
        let mut other = record(3, ActionType::Update, json!({"id": 5, "n": 1}), Some(json!({"n": 2})), key);
        other.table_name = "untracked".into();
        let mut records = vec![other];
        let prior = StubPrior::default();

        attach_diffs(&mut records, &registry(), &prior).await.unwrap();

        assert_eq!(records[0].entity, None);
        assert_eq!(records[0].entity_key, None);
        assert_eq!(records[0].diff.len(), 1);
        assert!(prior.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_units_follow_page_order() {
        let first = UnitKey::new(KeyType::Transaction, 700);
        let second = UnitKey::new(KeyType::Changeset, 4);
        let mut in_changeset = record(5, ActionType::Insert, json!({"id": 2}), None, second);
        in_changeset.changeset_id = Some(4);

        let records = vec![
            record(1, ActionType::Insert, json!({"id": 1}), None, first),
            in_changeset,
            record(2, ActionType::Update, json!({"id": 1}), Some(json!({})), first),
        ];
        let request_date = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let changesets = HashMap::from([(
            4,
            ChangesetInfo {
                id: 4,
                transaction_id: Some(800),
                user_id: Some(12),
                session_id: None,
                request_date,
                request_url: Some("/posts/2".into()),
                request_addr: None,
            },
        )]);

        let units = assemble_units(
            &[second, first, UnitKey::new(KeyType::Action, 99)],
            &changesets,
            records,
        );

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].key, second);
        assert_eq!(units[0].request_date, request_date);
        assert_eq!(units[0].changeset.as_ref().unwrap().user_id, Some(12));
        assert_eq!(units[1].key, first);
        assert!(units[1].changeset.is_none());
        assert_eq!(units[1].request_date, units[1].actions[0].action_date);
        let ids: Vec<i64> = units[1].actions.iter().map(|a| a.action_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
