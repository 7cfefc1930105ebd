//! `pgtrail install` and `pgtrail remove` command implementations
//!
//! Without `--run` the plan is printed as SQL and nothing is executed.

use crate::context::Context;
use crate::error::Result;
use colored::Colorize;
use pgtrail_server::catalog::PgCatalog;
use pgtrail_server::installer::{Direction, PgExecutor, Plan, Reconciler};

pub async fn install(ctx: &Context, entity: Option<&str>, run: bool) -> Result<()> {
    execute(ctx, entity, Direction::Up, run).await
}

pub async fn remove(ctx: &Context, entity: Option<&str>, run: bool) -> Result<()> {
    execute(ctx, entity, Direction::Down, run).await
}

async fn execute(ctx: &Context, entity: Option<&str>, direction: Direction, run: bool) -> Result<()> {
    let entity = entity.map(|e| ctx.entity(e)).transpose()?;

    let pool = ctx.connect().await?;
    let catalog = PgCatalog::new(pool.clone());
    let reconciler = Reconciler::new(&catalog, &ctx.names, &ctx.registry);

    let plan = match entity {
        Some(entity) => reconciler.plan(&entity.name, direction).await?,
        None => reconciler.plan_shared(direction).await?,
    };
    let subject = entity.map_or("shared audit objects", |e| e.name.as_str());

    if plan.is_empty() {
        eprintln!("{} Nothing to do for {}.", "✓".green(), subject);
        return Ok(());
    }

    if !run {
        print!("{}", plan.script());
        eprintln!();
        eprintln!(
            "{} statement(s) planned for {}. Re-run with --run to execute them.",
            plan.len(),
            subject
        );
        return Ok(());
    }

    let executed = apply(&pool, &plan).await?;
    tracing::info!(subject, direction = %direction, executed, "Plan applied");
    eprintln!(
        "{} Executed {} statement(s) for {}.",
        "✓".green(),
        executed,
        subject
    );
    Ok(())
}

async fn apply(pool: &sqlx::PgPool, plan: &Plan) -> Result<usize> {
    let mut executor = PgExecutor::begin(pool).await?;
    plan.apply(&mut executor).await?;
    Ok(executor.commit().await?)
}
