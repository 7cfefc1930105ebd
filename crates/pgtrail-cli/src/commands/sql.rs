//! `pgtrail sql` command implementation
//!
//! Plans against an in-memory catalog holding only the tracked table, so the script is the full
//! installation regardless of what the database already has.

use crate::context::Context;
use crate::error::Result;
use pgtrail_server::catalog::MemoryCatalog;
use pgtrail_server::installer::{Direction, Reconciler};
use pgtrail_server::{AuditNames, EntityRegistry};

pub async fn run(ctx: &Context, entity: &str, down: bool) -> Result<()> {
    let entity = ctx.entity(entity)?;
    print!("{}", script(&ctx.names, &ctx.registry, &entity.name, down).await?);
    Ok(())
}

/// Complete install script of `entity`, or its removal script once installed.
pub async fn script(
    names: &AuditNames,
    registry: &EntityRegistry,
    entity: &str,
    down: bool,
) -> Result<String> {
    let entity = registry.resolve(entity)?;
    let mut catalog = MemoryCatalog::new();
    catalog.add_table(entity.table.clone(), Vec::new());

    let up = Reconciler::new(&catalog, names, registry)
        .plan(&entity.name, Direction::Up)
        .await?;
    if !down {
        return Ok(up.script());
    }

    up.apply(&mut catalog).await?;
    let plan = Reconciler::new(&catalog, names, registry)
        .plan(&entity.name, Direction::Down)
        .await?;
    Ok(plan.script())
}
