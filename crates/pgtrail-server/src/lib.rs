//! pgtrail server library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Trigger-based audit trail for PostgreSQL.
//!
//! # Overview
//!
//! - **Capture**: a PL/pgSQL trigger function records every row change of a tracked table into
//!   one shared audit table, inside the writer's transaction
//! - **Changesets**: application-level grouping of writes spanning several transactions, tagged
//!   through a connection-scoped setting ([`capture::ChangesetScope`])
//! - **Installer**: reconciles the database catalog with the expected audit objects, producing
//!   idempotent plans that run directly, print as SQL or become migration files
//! - **History**: resolves audit records back into units of work (changeset, transaction or single
//!   action) with per-record diffs, served over HTTP under `/api/v1/history`
//!
//! # Example
//!
//! ```no_run
//! use pgtrail_server::{catalog::PgCatalog, config::Config, db, installer::{Direction, PgExecutor, Reconciler}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let (names, registry) = (config.audit_names()?, config.registry()?);
//!     let catalog = PgCatalog::new(pool.clone());
//!
//!     let plan = Reconciler::new(&catalog, &names, &registry).plan("post", Direction::Up).await?;
//!     let mut executor = PgExecutor::begin(&pool).await?;
//!     plan.apply(&mut executor).await?;
//!     executor.commit().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod db;
pub mod ddl;
pub mod error;
pub mod features;
pub mod installer;
pub mod middleware;
pub mod registry;
pub mod resolver;

pub use error::{AuditError, AuditResult};
pub use registry::{AuditNames, EntityRegistry, TrackedEntity};
