//! Loaded configuration shared by every command

use crate::error::{CliError, Result};
use pgtrail_server::config::Config;
use pgtrail_server::{db, AuditNames, EntityRegistry, TrackedEntity};
use sqlx::PgPool;
use std::path::Path;

pub struct Context {
    pub config: Config,
    pub names: AuditNames,
    pub registry: EntityRegistry,
}

impl Context {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Config::load(path)?;
        let names = config.audit_names()?;
        let registry = config.registry()?;
        Ok(Self {
            config,
            names,
            registry,
        })
    }

    /// Registration of an entity, by entity or table name.
    pub fn entity(&self, reference: &str) -> Result<&TrackedEntity> {
        Ok(self.registry.resolve(reference)?)
    }

    pub async fn connect(&self) -> Result<PgPool> {
        db::create_pool(&self.config.database)
            .await
            .map_err(|err| CliError::Connection(err.to_string()))
    }
}
