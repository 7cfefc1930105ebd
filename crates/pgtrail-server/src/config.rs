//! Configuration management
//!
//! Settings come from an optional TOML file (default `pgtrail.toml`, overridable with
//! `PGTRAIL_CONFIG`) layered under `PGTRAIL__<SECTION>__<KEY>` environment variables.
//! `DATABASE_URL` wins over both for the connection string. Tracked entities can only be
//! declared in the file:
//!
//! ```toml
//! [audit]
//! audit_table = "audits.logged_actions"
//! changeset_table = "audits.changesets"
//!
//! [[entities]]
//! name = "post"
//! table = "public.posts"
//! excluded_columns = ["updated_at"]
//! related = ["comment"]
//! ```

use crate::error::{AuditError, AuditResult};
use crate::registry::{
    AuditNames, EntityRegistry, TrackedEntity, DEFAULT_AUDIT_TABLE, DEFAULT_CHANGESET_TABLE,
};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Configuration file read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "pgtrail.toml";

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown grace period in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/postgres";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database acquire timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds.
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub audit: AuditConfig,
    pub entities: Vec<TrackedEntity>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    /// Allowed CORS origins; empty or "*" allows any
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// Database connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: Some(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
        }
    }
}

/// Location of the shared audit tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub audit_table: String,
    pub changeset_table: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            audit_table: DEFAULT_AUDIT_TABLE.to_string(),
            changeset_table: DEFAULT_CHANGESET_TABLE.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the file, the environment and `.env`.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> AuditResult<Self> {
        dotenvy::dotenv().ok();

        let (file, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match std::env::var("PGTRAIL_CONFIG") {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
            },
        };

        let builder = config::Config::builder()
            .add_source(File::from(file.as_path()).format(FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix("PGTRAIL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())
            .map_err(config_error)?;

        let config: Config = builder
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;

        config.validate()?;

        tracing::debug!(
            file = %file.display(),
            entities = config.entities.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse configuration from TOML text without consulting the environment.
    pub fn from_toml(text: &str) -> AuditResult<Self> {
        let config: Config = config::Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> AuditResult<()> {
        if self.server.port == 0 {
            return Err(AuditError::config("Server port must be greater than 0"));
        }

        if self.database.url.is_empty() {
            return Err(AuditError::config("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(AuditError::config(
                "Database max_connections must be greater than 0",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AuditError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        self.audit_names()?;
        self.registry()?;

        Ok(())
    }

    pub fn audit_names(&self) -> AuditResult<AuditNames> {
        AuditNames::parse(&self.audit.audit_table, &self.audit.changeset_table)
    }

    pub fn registry(&self) -> AuditResult<EntityRegistry> {
        EntityRegistry::new(self.entities.clone())
    }
}

fn config_error(err: config::ConfigError) -> AuditError {
    AuditError::config(err.to_string())
}
