//! Feature modules exposed over HTTP
//!
//! - **history**: change query façade (unit-of-work history, record versions, attribute
//!   timelines, version snapshots)
//! - **shared**: pagination types

pub mod history;
pub mod shared;

use crate::catalog::PgCatalog;
use crate::registry::{AuditNames, EntityRegistry};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub db: PgPool,
    pub names: Arc<AuditNames>,
    pub registry: Arc<EntityRegistry>,
}

impl FeatureState {
    pub fn new(db: PgPool, names: AuditNames, registry: EntityRegistry) -> Self {
        Self {
            db,
            names: Arc::new(names),
            registry: Arc::new(registry),
        }
    }

    pub fn catalog(&self) -> PgCatalog {
        PgCatalog::new(self.db.clone())
    }
}

/// API router with every feature mounted under its own prefix:
/// - `/history` - change history of tracked entities
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest("/history", history::history_routes().with_state(state))
}
