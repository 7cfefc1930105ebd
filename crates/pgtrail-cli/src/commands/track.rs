//! `pgtrail track` command implementation

use crate::context::Context;
use crate::error::Result;
use colored::Colorize;
use pgtrail_server::capture::{has_trigger, toggle_tracking};
use pgtrail_server::catalog::PgCatalog;
use pgtrail_server::installer::PgExecutor;

/// Enable or disable capture; `None` flips the current state.
pub async fn run(ctx: &Context, entity: &str, enable: Option<bool>) -> Result<()> {
    let entity = ctx.entity(entity)?;

    let pool = ctx.connect().await?;
    let catalog = PgCatalog::new(pool.clone());
    let mut executor = PgExecutor::begin(&pool).await?;
    let enabled = toggle_tracking(&catalog, &mut executor, entity, enable).await?;
    executor.commit().await?;

    println!("{}: {}", entity.name.bold(), describe(Some(enabled)));
    Ok(())
}

pub async fn status(ctx: &Context, entity: &str) -> Result<()> {
    let entity = ctx.entity(entity)?;

    let pool = ctx.connect().await?;
    let catalog = PgCatalog::new(pool);
    let state = has_trigger(&catalog, entity).await?;

    println!("{}: {}", entity.name.bold(), describe(state));
    Ok(())
}

fn describe(state: Option<bool>) -> colored::ColoredString {
    match state {
        Some(true) => "tracking enabled".green(),
        Some(false) => "tracking disabled".yellow(),
        None => "capture triggers not installed".red(),
    }
}
