//! Catalog probes against `pg_catalog`

use super::{same_type, Catalog, CatalogObject, ColumnInfo};
use crate::error::AuditResult;
use async_trait::async_trait;
use pgtrail_common::{Ident, QualifiedName};
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn column_type(&self, table: &QualifiedName, column: &Ident) -> AuditResult<Option<String>> {
        let data_type = sqlx::query_scalar::<_, String>(
            r#"
            SELECT format_type(a.atttypid, a.atttypmod)
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2 AND a.attname = $3
              AND a.attnum > 0 AND NOT a.attisdropped
            "#,
        )
        .bind(table.schema().as_str())
        .bind(table.name().as_str())
        .bind(column.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(data_type)
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn exists(&self, object: &CatalogObject) -> AuditResult<bool> {
        let found = match object {
            CatalogObject::Schema(name) => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)",
                )
                .bind(name.as_str())
                .fetch_one(&self.pool)
                .await?
            },
            CatalogObject::EnumType(name) => {
                sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM pg_type t
                        JOIN pg_namespace n ON n.oid = t.typnamespace
                        WHERE n.nspname = $1 AND t.typname = $2 AND t.typtype = 'e'
                    )
                    "#,
                )
                .bind(name.schema().as_str())
                .bind(name.name().as_str())
                .fetch_one(&self.pool)
                .await?
            },
            CatalogObject::Function { name, args } => {
                sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM pg_proc p
                        JOIN pg_namespace n ON n.oid = p.pronamespace
                        WHERE n.nspname = $1 AND p.proname = $2
                          AND oidvectortypes(p.proargtypes) = $3
                    )
                    "#,
                )
                .bind(name.schema().as_str())
                .bind(name.name().as_str())
                .bind(args.join(", "))
                .fetch_one(&self.pool)
                .await?
            },
            CatalogObject::Table(name) => {
                sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM pg_class c
                        JOIN pg_namespace n ON n.oid = c.relnamespace
                        WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p')
                    )
                    "#,
                )
                .bind(name.schema().as_str())
                .bind(name.name().as_str())
                .fetch_one(&self.pool)
                .await?
            },
            CatalogObject::Column {
                table,
                name,
                data_type,
            } => match self.column_type(table, name).await? {
                Some(actual) => same_type(data_type, &actual),
                None => false,
            },
            CatalogObject::Index { table, name } => {
                sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM pg_indexes
                        WHERE schemaname = $1 AND tablename = $2 AND indexname = $3
                    )
                    "#,
                )
                .bind(table.schema().as_str())
                .bind(table.name().as_str())
                .bind(name.as_str())
                .fetch_one(&self.pool)
                .await?
            },
            CatalogObject::Trigger { table, name } => {
                self.trigger_state(table, name).await?.is_some()
            },
        };

        tracing::trace!(object = %object, found, "Catalog probe");
        Ok(found)
    }

    async fn columns(&self, table: &QualifiedName) -> AuditResult<Vec<ColumnInfo>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT a.attname::text, format_type(a.atttypid, a.atttypmod)
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
              AND a.attnum > 0 AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
        )
        .bind(table.schema().as_str())
        .bind(table.name().as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type)| ColumnInfo { name, data_type })
            .collect())
    }

    async fn trigger_state(
        &self,
        table: &QualifiedName,
        trigger: &Ident,
    ) -> AuditResult<Option<bool>> {
        let state = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT t.tgenabled <> 'D'
            FROM pg_trigger t
            JOIN pg_class c ON c.oid = t.tgrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2 AND t.tgname = $3
            "#,
        )
        .bind(table.schema().as_str())
        .bind(table.name().as_str())
        .bind(trigger.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn trigger_arguments(
        &self,
        table: &QualifiedName,
        trigger: &Ident,
    ) -> AuditResult<Option<Vec<String>>> {
        let tgargs = sqlx::query_scalar::<_, Vec<u8>>(
            r#"
            SELECT t.tgargs
            FROM pg_trigger t
            JOIN pg_class c ON c.oid = t.tgrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2 AND t.tgname = $3
            "#,
        )
        .bind(table.schema().as_str())
        .bind(table.name().as_str())
        .bind(trigger.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(tgargs.as_deref().map(decode_tgargs))
    }

    async fn capture_relations(&self, function: &QualifiedName) -> AuditResult<Vec<String>> {
        let relations = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT n.nspname || '.' || c.relname
            FROM pg_trigger t
            JOIN pg_class c ON c.oid = t.tgrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_proc p ON p.oid = t.tgfoid
            JOIN pg_namespace pn ON pn.oid = p.pronamespace
            WHERE NOT t.tgisinternal AND pn.nspname = $1 AND p.proname = $2
            ORDER BY 1
            "#,
        )
        .bind(function.schema().as_str())
        .bind(function.name().as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(relations)
    }

    async fn relation_id(&self, table: &QualifiedName) -> AuditResult<Option<i64>> {
        let oid = sqlx::query_scalar::<_, Option<i64>>("SELECT to_regclass($1)::oid::bigint")
            .bind(table.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(oid)
    }
}

/// `tgargs` holds each argument followed by a NUL byte.
fn decode_tgargs(raw: &[u8]) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.strip_suffix(&[0])
        .unwrap_or(raw)
        .split(|b| *b == 0)
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tgargs() {
        assert_eq!(
            decode_tgargs(b"true\0{updated_at,views}\0false\0"),
            vec!["true", "{updated_at,views}", "false"]
        );
        assert_eq!(decode_tgargs(b"\0"), vec![""]);
        assert!(decode_tgargs(b"").is_empty());
    }
}
