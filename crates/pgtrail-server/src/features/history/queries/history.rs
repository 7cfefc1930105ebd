use crate::error::AuditResult;
use crate::features::shared::pagination::{Paginated, PaginationParams};
use crate::features::FeatureState;
use crate::resolver::{ActionFilter, Resolver, UnitOfWork};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Narrow the history to one row; a scalar or an object of primary key columns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    #[serde(default)]
    pub filter: ActionFilter,
    #[serde(default)]
    pub pagination: PaginationParams,
}

/// Units of work touching the entity or its related entities, most recent first.
#[tracing::instrument(skip(state, query), fields(key = ?query.key))]
pub async fn history(
    state: &FeatureState,
    entity: &str,
    query: &HistoryQuery,
) -> AuditResult<Paginated<UnitOfWork>> {
    query.pagination.validate()?;
    let entity = state.registry.resolve(entity)?;
    let catalog = state.catalog();
    let resolver = Resolver::new(&state.db, &state.names, &state.registry, &catalog);

    let page = resolver
        .resolve(
            entity,
            query.key.as_ref(),
            &query.filter,
            query.pagination.per_page(),
            query.pagination.offset(),
        )
        .await?;

    tracing::debug!(
        entity = %entity.name,
        units = page.units.len(),
        total = page.total,
        "History resolved"
    );

    Ok(Paginated::from_items(page.units, &query.pagination, page.total))
}
