//! SQL for unit-of-work resolution
//!
//! Table names come from [`AuditNames`]; every caller-supplied value is bound.

use super::filter::{like_pattern, ActionFilter};
use super::models::UnitKey;
use crate::registry::AuditNames;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};

/// Resolved unit id; must stay identical to the unit key index expression.
pub const UNIT_ID: &str =
    "CASE a.key_type WHEN 'c' THEN a.changeset_id WHEN 't' THEN a.transaction_id ELSE a.action_id END";

/// Inputs of the key discovery phase
#[derive(Debug, Clone, Copy)]
pub struct KeyQuery<'a> {
    pub names: &'a AuditNames,
    /// Relation ids of the tracked entity and its related entities
    pub scope: &'a [i64],
    /// Primary key object the captured row must contain
    pub entity_key: Option<&'a Value>,
    pub filter: &'a ActionFilter,
    /// Relation ids resolved from `filter.tables`
    pub filter_relations: &'a [i64],
}

/// Column list producing an [`AuditRow`](super::models::AuditRow).
pub fn record_columns() -> String {
    format!(
        r#"a.action_id, a.schema_name, a.table_name, a.relation_id::bigint AS relation_id,
       a.transaction_date, a.statement_date, a.action_date, a.transaction_id,
       a.session_user_name, a.application_name, host(a.client_addr) AS client_addr,
       a.client_port, a.query, a.action_type::text AS action_type, a.row_data,
       a.changed_fields, a.statement_only, a.key_type::text AS key_type, a.changeset_id,
       {UNIT_ID} AS unit_id"#
    )
}

/// `WITH matched AS (...)`: unit keys and dates of every matching record.
fn push_matched(builder: &mut QueryBuilder<'static, Postgres>, query: &KeyQuery<'_>) {
    let filter = query.filter;

    builder.push(format!(
        r#"WITH matched AS (
    SELECT a.key_type, {UNIT_ID} AS unit_id, a.action_date
    FROM {} a
    LEFT JOIN {} c ON c.id = a.changeset_id
    WHERE NOT a.statement_only
      AND a.relation_id = ANY(CAST("#,
        query.names.audit_table(),
        query.names.changeset_table()
    ));
    builder.push_bind(query.scope.to_vec());
    builder.push(" AS oid[]))");

    if let Some(key) = query.entity_key {
        builder.push("\n      AND a.row_data @> ");
        builder.push_bind(key.clone());
    }
    if let Some(from) = filter.from {
        builder.push("\n      AND a.action_date >= ");
        builder.push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push("\n      AND a.action_date <= ");
        builder.push_bind(to);
    }
    if let Some(url) = &filter.request_url {
        builder.push("\n      AND c.request_url ILIKE ");
        builder.push_bind(like_pattern(url));
    }
    if !filter.user_ids.is_empty() {
        builder.push("\n      AND c.user_id = ANY(");
        builder.push_bind(filter.user_ids.clone());
        builder.push(")");
    }
    if !filter.request_addrs.is_empty() {
        builder.push("\n      AND c.request_addr = ANY(CAST(");
        builder.push_bind(filter.request_addrs.clone());
        builder.push(" AS inet[]))");
    }
    if !filter.tables.is_empty() {
        builder.push("\n      AND a.relation_id = ANY(CAST(");
        builder.push_bind(query.filter_relations.to_vec());
        builder.push(" AS oid[]))");
    }
    if !filter.action_types.is_empty() {
        builder.push("\n      AND a.action_type::text = ANY(");
        builder.push_bind(
            filter
                .action_types
                .iter()
                .map(|t| t.as_str().to_string())
                .collect::<Vec<_>>(),
        );
        builder.push(")");
    }
    if !filter.attributes.is_empty() {
        builder.push("\n      AND a.changed_fields ?| ");
        builder.push_bind(filter.attributes.clone());
    }
    if let Some(value) = &filter.value {
        builder.push(
            "\n      AND EXISTS (SELECT 1 FROM jsonb_each_text(COALESCE(a.row_data, '{}'::jsonb) || COALESCE(a.changed_fields, '{}'::jsonb)) v WHERE v.value ILIKE ",
        );
        builder.push_bind(like_pattern(value));
        builder.push(")");
    }

    builder.push("\n)\n");
}

/// Phase 1: one page of unit keys, most recently active first.
///
/// Rows: `(key_type text, unit_id bigint, last_action_date timestamptz)`.
pub fn unit_keys(query: &KeyQuery<'_>, limit: i64, offset: i64) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("");
    push_matched(&mut builder, query);
    builder.push(
        r#"SELECT key_type::text AS key_type, unit_id, MAX(action_date) AS last_action_date
FROM matched
GROUP BY key_type, unit_id
ORDER BY last_action_date DESC, key_type, unit_id DESC
LIMIT "#,
    );
    builder.push_bind(limit);
    builder.push(" OFFSET ");
    builder.push_bind(offset);
    builder
}

/// Phase 1: number of distinct unit keys.
pub fn unit_count(query: &KeyQuery<'_>) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("");
    push_matched(&mut builder, query);
    builder.push("SELECT COUNT(*) FROM (SELECT DISTINCT key_type, unit_id FROM matched) units");
    builder
}

/// Phase 2: every record of the given units.
///
/// Transaction units are limited to the scope; changeset and single-action units are returned
/// whole.
pub fn hydrate(names: &AuditNames, scope: &[i64], keys: &[UnitKey]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {}\nFROM {} a\nWHERE NOT a.statement_only\n  AND (a.key_type <> 't' OR a.relation_id = ANY(CAST(",
        record_columns(),
        names.audit_table()
    ));
    builder.push_bind(scope.to_vec());
    builder.push(format!(
        " AS oid[])))\n  AND (a.key_type, {UNIT_ID}) IN (\n    SELECT CAST(u.key_type AS character(1)), u.unit_id\n    FROM UNNEST(CAST("
    ));
    builder.push_bind(
        keys.iter()
            .map(|k| k.key_type.code().to_string())
            .collect::<Vec<_>>(),
    );
    builder.push(" AS text[]), CAST(");
    builder.push_bind(keys.iter().map(|k| k.id).collect::<Vec<_>>());
    builder.push(" AS bigint[])) AS u(key_type, unit_id)\n  )\nORDER BY a.action_date, a.action_id");
    builder
}

/// Changesets by id. Binds: `$1 integer[]`.
pub fn changesets(names: &AuditNames) -> String {
    format!(
        r#"SELECT id, transaction_id, user_id, session_id, request_date, request_url,
       host(request_addr) AS request_addr
FROM {}
WHERE id = ANY($1)"#,
        names.changeset_table()
    )
}

/// Nearest earlier record of one row. Binds: `$1 relation id, $2 key object, $3 action id`.
pub fn previous_record(names: &AuditNames) -> String {
    format!(
        r#"SELECT a.action_type::text AS action_type, a.row_data, a.changed_fields
FROM {} a
WHERE a.relation_id = CAST($1 AS oid)
  AND NOT a.statement_only
  AND a.row_data @> $2
  AND a.action_id < $3
ORDER BY a.action_id DESC
LIMIT 1"#,
        names.audit_table()
    )
}

/// All records of one row in action-id order. Binds: `$1 relation id, $2 key object`.
pub fn row_records(names: &AuditNames) -> String {
    format!(
        r#"SELECT {}
FROM {} a
WHERE a.relation_id = CAST($1 AS oid)
  AND NOT a.statement_only
  AND a.row_data @> $2
ORDER BY a.action_id"#,
        record_columns(),
        names.audit_table()
    )
}

/// One record by action id. Binds: `$1 action id`.
pub fn record_by_id(names: &AuditNames) -> String {
    format!(
        "SELECT {}\nFROM {} a\nWHERE a.action_id = $1 AND NOT a.statement_only",
        record_columns(),
        names.audit_table()
    )
}
