//! Unit-of-work resolver
//!
//! Answers "what happened to this entity, grouped by logical operation" in two phases:
//!
//! 1. **Key discovery**: distinct `(key_type, id)` pairs of the records matching the filter and
//!    the relation scope, most recently active first, one page at a time
//! 2. **Hydration**: every record of those units, reassembled per key in page order, each with
//!    its diff against the previous state of the same row

pub mod assemble;
pub mod filter;
pub mod models;
pub mod query;

pub use assemble::{assemble_units, attach_diffs, PgPriorState, PriorState};
pub use filter::ActionFilter;
pub use models::{ActionType, AuditRecord, ChangesetInfo, KeyType, UnitKey, UnitOfWork};

use crate::catalog::Catalog;
use crate::error::{AuditError, AuditResult};
use crate::registry::{AuditNames, EntityRegistry, TrackedEntity};
use chrono::{DateTime, Utc};
use models::AuditRow;
use pgtrail_common::QualifiedName;
use query::KeyQuery;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One page of units and the total number of matching units
#[derive(Debug, Clone)]
pub struct ResolvedPage {
    pub units: Vec<UnitOfWork>,
    pub total: i64,
}

pub struct Resolver<'a> {
    pool: &'a PgPool,
    names: &'a AuditNames,
    registry: &'a EntityRegistry,
    catalog: &'a dyn Catalog,
}

impl<'a> Resolver<'a> {
    pub fn new(
        pool: &'a PgPool,
        names: &'a AuditNames,
        registry: &'a EntityRegistry,
        catalog: &'a dyn Catalog,
    ) -> Self {
        Self {
            pool,
            names,
            registry,
            catalog,
        }
    }

    /// Relation ids of the entity's table and its related entities' tables.
    ///
    /// The entity's own table must exist; missing related tables are skipped.
    pub async fn scope_relations(&self, entity: &TrackedEntity) -> AuditResult<Vec<i64>> {
        let mut relations = Vec::new();
        for member in self.registry.scope(entity) {
            match self.catalog.relation_id(&member.table).await? {
                Some(id) => relations.push(id),
                None if member.name == entity.name => {
                    return Err(AuditError::config(format!(
                        "Table {} of entity '{}' does not exist",
                        member.table, member.name
                    )));
                },
                None => warn!(
                    entity = %entity.name,
                    related = %member.name,
                    table = %member.table,
                    "Related table does not exist, leaving it out of the history scope"
                ),
            }
        }
        Ok(relations)
    }

    /// Relation ids of the filter's table references (entity names or table names).
    pub async fn filter_relations(&self, filter: &ActionFilter) -> AuditResult<Vec<i64>> {
        let mut relations = Vec::with_capacity(filter.tables.len());
        for reference in &filter.tables {
            let table = match self.registry.resolve(reference) {
                Ok(entity) => entity.table.clone(),
                Err(_) => reference.parse::<QualifiedName>().map_err(|e| {
                    AuditError::input(format!("Cannot map '{}' to a table: {}", reference, e))
                })?,
            };
            let id = self.catalog.relation_id(&table).await?.ok_or_else(|| {
                AuditError::input(format!("Table {} does not exist", table))
            })?;
            relations.push(id);
        }
        Ok(relations)
    }

    /// Resolve one page of units of work touching `entity`.
    ///
    /// `key` narrows the history to one row of the entity's table; related entities still
    /// contribute through shared transactions and changesets.
    pub async fn resolve(
        &self,
        entity: &TrackedEntity,
        key: Option<&Value>,
        filter: &ActionFilter,
        limit: i64,
        offset: i64,
    ) -> AuditResult<ResolvedPage> {
        filter.validate()?;
        let entity_key = key.map(|k| entity.key_from(k)).transpose()?;

        let scope = match entity_key {
            Some(_) => self
                .catalog
                .relation_id(&entity.table)
                .await?
                .map(|id| vec![id])
                .ok_or_else(|| {
                    AuditError::config(format!(
                        "Table {} of entity '{}' does not exist",
                        entity.table, entity.name
                    ))
                })?,
            None => self.scope_relations(entity).await?,
        };
        let filter_relations = self.filter_relations(filter).await?;

        let key_query = KeyQuery {
            names: self.names,
            scope: &scope,
            entity_key: entity_key.as_ref(),
            filter,
            filter_relations: &filter_relations,
        };

        let total: i64 = query::unit_count(&key_query)
            .build_query_scalar()
            .fetch_one(self.pool)
            .await?;

        let page: Vec<(String, i64, DateTime<Utc>)> = query::unit_keys(&key_query, limit, offset)
            .build_query_as()
            .fetch_all(self.pool)
            .await?;

        let keys = page
            .into_iter()
            .map(|(key_type, id, _)| Ok(UnitKey::new(key_type.parse()?, id)))
            .collect::<AuditResult<Vec<_>>>()?;

        debug!(
            entity = %entity.name,
            total,
            page = keys.len(),
            "Resolved unit keys"
        );

        if keys.is_empty() {
            return Ok(ResolvedPage {
                units: Vec::new(),
                total,
            });
        }

        let all_scope = self.scope_relations(entity).await?;
        let rows: Vec<AuditRow> = query::hydrate(self.names, &all_scope, &keys)
            .build_query_as()
            .fetch_all(self.pool)
            .await?;
        let mut records = rows
            .into_iter()
            .map(AuditRecord::try_from)
            .collect::<AuditResult<Vec<_>>>()?;

        let changesets = self.changesets(&records).await?;
        attach_diffs(
            &mut records,
            self.registry,
            &PgPriorState::new(self.pool, self.names),
        )
        .await?;

        Ok(ResolvedPage {
            units: assemble_units(&keys, &changesets, records),
            total,
        })
    }

    async fn changesets(&self, records: &[AuditRecord]) -> AuditResult<HashMap<i32, ChangesetInfo>> {
        let mut ids: Vec<i32> = records.iter().filter_map(|r| r.changeset_id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let changesets: Vec<ChangesetInfo> = sqlx::query_as(&query::changesets(self.names))
            .bind(&ids)
            .fetch_all(self.pool)
            .await?;
        Ok(changesets.into_iter().map(|c| (c.id, c)).collect())
    }
}
