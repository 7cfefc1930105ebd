//! Changeset scopes
//!
//! A changeset groups every write made while it is active into one unit of work, even across
//! tables and transactions. The active changeset id lives in the session setting
//! [`CHANGESET_SETTING`], which the capture function reads. [`ChangesetScope`] owns the pooled
//! connection carrying that setting, so writes must go through [`ChangesetScope::connection`].
//!
//! ```no_run
//! # async fn example(pool: sqlx::PgPool, names: pgtrail_server::registry::AuditNames) -> pgtrail_server::error::AuditResult<()> {
//! use pgtrail_server::capture::{Actor, ChangesetScope};
//!
//! let actor = Actor {
//!     user_id: Some(42),
//!     request_url: Some("/posts/7/edit".to_string()),
//!     ..Actor::default()
//! };
//!
//! let mut scope = ChangesetScope::begin(&pool, &names, &actor).await?;
//! sqlx::query("UPDATE posts SET title = 'b' WHERE id = 7")
//!     .execute(scope.connection())
//!     .await?;
//! scope.end().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::clear_changeset_sql;
use crate::error::AuditResult;
use crate::registry::AuditNames;
use serde::{Deserialize, Serialize};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use std::net::IpAddr;

/// Session setting holding the active changeset id.
pub const CHANGESET_SETTING: &str = "audit.changeset_id";

/// Who is making a change, recorded once per changeset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<i32>,
    pub session_id: Option<String>,
    pub request_url: Option<String>,
    pub request_addr: Option<IpAddr>,
}

/// Supplies the current actor when a changeset begins
pub trait ActorProvider: Send + Sync {
    fn current_actor(&self) -> Actor;
}

impl ActorProvider for Actor {
    fn current_actor(&self) -> Actor {
        self.clone()
    }
}

/// An open changeset bound to one pooled connection
///
/// Dropping the scope without [`end`](ChangesetScope::end) closes the connection instead of
/// returning it, so the setting never reaches another borrower whatever pool it came from.
#[derive(Debug)]
pub struct ChangesetScope {
    conn: PoolConnection<Postgres>,
    id: i32,
    ended: bool,
}

impl ChangesetScope {
    /// Record a changeset row for the current actor and activate it on a fresh connection.
    pub async fn begin(
        pool: &PgPool,
        names: &AuditNames,
        actor: &dyn ActorProvider,
    ) -> AuditResult<Self> {
        let actor = actor.current_actor();
        let mut conn = pool.acquire().await?;

        let id = sqlx::query_scalar::<_, i32>(&format!(
            r#"
            INSERT INTO {} (transaction_id, user_id, session_id, request_date, request_url, request_addr)
            VALUES (txid_current(), $1, $2, now(), $3, $4::inet)
            RETURNING id
            "#,
            names.changeset_table()
        ))
        .bind(actor.user_id)
        .bind(&actor.session_id)
        .bind(&actor.request_url)
        .bind(actor.request_addr.map(|addr| addr.to_string()))
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("SELECT set_config($1, $2, false)")
            .bind(CHANGESET_SETTING)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;

        tracing::debug!(changeset_id = id, user_id = ?actor.user_id, "Changeset started");

        Ok(Self {
            conn,
            id,
            ended: false,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Connection on which writes are attributed to this changeset.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Clear the setting and hand the connection back to the pool.
    pub async fn end(mut self) -> AuditResult<i32> {
        sqlx::query(&clear_changeset_sql())
            .execute(&mut *self.conn)
            .await?;
        self.ended = true;
        tracing::debug!(changeset_id = self.id, "Changeset ended");
        Ok(self.id)
    }
}

impl Drop for ChangesetScope {
    fn drop(&mut self) {
        if !self.ended {
            tracing::warn!(
                changeset_id = self.id,
                "Changeset scope dropped without end, discarding its connection"
            );
            self.conn.close_on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_provides_itself() {
        let actor = Actor {
            user_id: Some(1),
            request_addr: "10.0.0.1".parse().ok(),
            ..Actor::default()
        };
        assert_eq!(actor.current_actor(), actor);
    }
}
