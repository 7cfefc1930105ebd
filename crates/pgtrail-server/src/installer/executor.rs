//! Command executors for installer plans

use super::PlannedCommand;
use crate::error::AuditResult;
use async_trait::async_trait;
use sqlx::{Executor, PgConnection, PgPool, Postgres, Transaction};

/// Runs planned DDL, or pretends to
#[async_trait]
pub trait CommandExecutor: Send {
    async fn execute(&mut self, command: &PlannedCommand) -> AuditResult<()>;
}

/// Records statements without running them
#[derive(Debug, Default)]
pub struct DryRun {
    statements: Vec<String>,
}

impl DryRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Recorded statements as one script, each terminated with `;`.
    pub fn script(&self) -> String {
        render_script(self.statements.iter().map(String::as_str))
    }
}

#[async_trait]
impl CommandExecutor for DryRun {
    async fn execute(&mut self, command: &PlannedCommand) -> AuditResult<()> {
        self.statements.push(command.sql.clone());
        Ok(())
    }
}

/// Runs every command inside one transaction; nothing is applied unless [`commit`] is called.
///
/// [`commit`]: PgExecutor::commit
pub struct PgExecutor {
    tx: Transaction<'static, Postgres>,
    executed: usize,
}

impl PgExecutor {
    pub async fn begin(pool: &PgPool) -> AuditResult<Self> {
        Ok(Self {
            tx: pool.begin().await?,
            executed: 0,
        })
    }

    pub async fn commit(self) -> AuditResult<usize> {
        self.tx.commit().await?;
        tracing::info!(statements = self.executed, "Committed installer transaction");
        Ok(self.executed)
    }
}

#[async_trait]
impl CommandExecutor for PgExecutor {
    async fn execute(&mut self, command: &PlannedCommand) -> AuditResult<()> {
        tracing::debug!(object = %command.object, "Executing DDL");
        let conn: &mut PgConnection = &mut self.tx;
        conn.execute(command.sql.as_str()).await?;
        self.executed += 1;
        Ok(())
    }
}

pub(crate) fn render_script<'a>(statements: impl IntoIterator<Item = &'a str>) -> String {
    statements
        .into_iter()
        .map(|s| format!("{};\n", s))
        .collect::<Vec<_>>()
        .join("\n")
}
