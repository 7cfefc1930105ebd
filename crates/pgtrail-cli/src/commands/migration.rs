//! `pgtrail migration` command implementation

use crate::context::Context;
use crate::error::{CliError, Result};
use chrono::Utc;
use colored::Colorize;
use pgtrail_server::catalog::PgCatalog;
use pgtrail_server::installer::Reconciler;
use std::path::Path;

/// Write `<timestamp>_audit_<entity>.up.sql` and `.down.sql` into `dir`.
pub async fn run(ctx: &Context, entity: &str, dir: &Path) -> Result<()> {
    let entity = ctx.entity(entity)?;

    let pool = ctx.connect().await?;
    let catalog = PgCatalog::new(pool);
    let migration = Reconciler::new(&catalog, &ctx.names, &ctx.registry)
        .migration(&entity.name)
        .await?;

    if migration.is_empty() {
        tracing::warn!(entity = %entity.name, "Audit objects already installed, no migration written");
        return Err(CliError::Input(format!(
            "Audit objects for '{}' are already installed; no migration written",
            entity.name
        )));
    }

    let (up, down) = migration.write(dir, Utc::now())?;
    println!("{} {}", "Created".green(), up.display());
    println!("{} {}", "Created".green(), down.display());
    Ok(())
}
