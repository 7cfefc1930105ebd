//! Plain up/down SQL migration files

use crate::error::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Install script for one tracked table and its exact inverse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub entity: String,
    pub up: String,
    pub down: String,
    pub statements: usize,
}

impl Migration {
    pub fn is_empty(&self) -> bool {
        self.statements == 0
    }

    /// Base name shared by both files, e.g. `20240131120000_audit_post`.
    pub fn file_stem(&self, timestamp: DateTime<Utc>) -> String {
        format!("{}_audit_{}", timestamp.format("%Y%m%d%H%M%S"), self.entity)
    }

    /// Write `<stem>.up.sql` and `<stem>.down.sql` into `dir`.
    ///
    /// An empty migration is refused rather than written.
    pub fn write(&self, dir: &Path, timestamp: DateTime<Utc>) -> AuditResult<(PathBuf, PathBuf)> {
        if self.is_empty() {
            return Err(AuditError::input(format!(
                "Audit objects for '{}' are already installed, nothing to migrate",
                self.entity
            )));
        }

        std::fs::create_dir_all(dir)?;
        let stem = self.file_stem(timestamp);
        let up = dir.join(format!("{}.up.sql", stem));
        let down = dir.join(format!("{}.down.sql", stem));

        std::fs::write(&up, &self.up)?;
        std::fs::write(&down, &self.down)?;

        tracing::info!(
            entity = %self.entity,
            up = %up.display(),
            down = %down.display(),
            statements = self.statements,
            "Wrote migration"
        );

        Ok((up, down))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn migration(statements: usize) -> Migration {
        Migration {
            entity: "post".to_string(),
            up: "CREATE SCHEMA audits;\n".to_string(),
            down: "DROP SCHEMA audits;\n".to_string(),
            statements,
        }
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();

        let (up, down) = migration(1).write(dir.path(), at).unwrap();

        assert_eq!(up.file_name().unwrap(), "20240131120000_audit_post.up.sql");
        assert_eq!(down.file_name().unwrap(), "20240131120000_audit_post.down.sql");
        assert_eq!(std::fs::read_to_string(up).unwrap(), "CREATE SCHEMA audits;\n");
        assert_eq!(std::fs::read_to_string(down).unwrap(), "DROP SCHEMA audits;\n");
    }

    #[test]
    fn test_empty_migration_refused() {
        let dir = tempfile::tempdir().unwrap();
        let result = migration(0).write(dir.path(), Utc::now());
        assert!(matches!(result, Err(AuditError::Input(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
