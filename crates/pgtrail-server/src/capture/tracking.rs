//! Enabling and disabling capture without dropping triggers

use crate::catalog::{Catalog, CatalogObject};
use crate::ddl::{self, ROW_TRIGGER, STATEMENT_TRIGGER};
use crate::error::{AuditError, AuditResult};
use crate::installer::{executor::CommandExecutor, Change, PlannedCommand};
use crate::registry::TrackedEntity;
use pgtrail_common::Ident;

/// `Some(enabled)` when the capture trigger is installed on the entity's table.
pub async fn has_trigger(catalog: &dyn Catalog, entity: &TrackedEntity) -> AuditResult<Option<bool>> {
    catalog
        .trigger_state(&entity.table, &Ident::from_static(ROW_TRIGGER))
        .await
}

/// Enable or disable both capture triggers; `None` flips the current state.
///
/// Returns the new state. Fails with a configuration error when the triggers are not installed.
pub async fn toggle_tracking(
    catalog: &dyn Catalog,
    executor: &mut dyn CommandExecutor,
    entity: &TrackedEntity,
    enable: Option<bool>,
) -> AuditResult<bool> {
    let current = has_trigger(catalog, entity).await?.ok_or_else(|| {
        AuditError::config(format!(
            "Capture triggers are not installed on {}; run `pgtrail install {}` first",
            entity.table, entity.name
        ))
    })?;
    let enable = enable.unwrap_or(!current);

    let triggers = [ROW_TRIGGER, STATEMENT_TRIGGER];
    let statements = ddl::toggle_triggers(entity, enable);
    let reverts = ddl::toggle_triggers(entity, !enable);

    for ((trigger, sql), revert) in triggers.into_iter().zip(statements).zip(reverts) {
        let command = PlannedCommand {
            object: CatalogObject::Trigger {
                table: entity.table.clone(),
                name: Ident::from_static(trigger),
            },
            change: Change::SetEnabled(enable),
            sql,
            revert,
        };
        executor.execute(&command).await?;
    }

    tracing::info!(entity = %entity.name, table = %entity.table, enabled = enable, "Tracking toggled");
    Ok(enable)
}
