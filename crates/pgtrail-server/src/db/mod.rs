//! Connection pool
//!
//! Every pooled connection has its changeset setting cleared when it is returned, so a
//! `ChangesetScope` that was dropped without `end()` cannot tag writes made by the next
//! borrower.

use crate::capture::changeset::CHANGESET_SETTING;
use crate::config::DatabaseConfig;
use crate::error::AuditResult;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// SQL that resets the changeset setting for the rest of the session.
pub fn clear_changeset_sql() -> String {
    format!("SELECT set_config('{}', '', false)", CHANGESET_SETTING)
}

pub async fn create_pool(config: &DatabaseConfig) -> AuditResult<PgPool> {
    let clear = clear_changeset_sql();

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .after_release(move |conn, _meta| {
            let clear = clear.clone();
            Box::pin(async move {
                sqlx::query(&clear).execute(&mut *conn).await?;
                Ok(true)
            })
        });

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options.connect(&config.url).await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> AuditResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
