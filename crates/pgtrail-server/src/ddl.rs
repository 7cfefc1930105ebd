//! DDL templates
//!
//! Pure functions from validated names to the SQL creating and dropping each audit object.
//! Only [`Ident`] and [`QualifiedName`] values are interpolated, so the output is stable for a
//! given configuration and safe to review or diff before running.

use crate::catalog::CatalogObject;
use crate::error::{AuditError, AuditResult};
use crate::registry::{AuditNames, TrackedEntity};
use pgtrail_common::{Ident, QualifiedName};

/// Row-level capture trigger installed on every tracked table.
pub const ROW_TRIGGER: &str = "log_action_row_trigger";

/// Statement-level capture trigger installed on every tracked table.
pub const STATEMENT_TRIGGER: &str = "log_action_stmt_trigger";

/// Capture function executed by both triggers.
pub const CAPTURE_FUNCTION: &str = "log_action";

pub const DELETE_KEYS_FUNCTION: &str = "jsonb_delete_keys";
pub const CHANGED_VALUES_FUNCTION: &str = "jsonb_changed_values";
pub const ACTION_TYPE: &str = "action_type";

/// An object with the statements creating and dropping it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub object: CatalogObject,
    pub up: String,
    pub down: String,
}

/// A column of a shared audit table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: Ident,
    /// Type as reported by `format_type`
    pub data_type: String,
    /// Type and constraints used in `CREATE TABLE` / `ADD COLUMN`
    pub definition: String,
}

impl ColumnDef {
    fn new(name: &str, data_type: &str, definition: impl Into<String>) -> AuditResult<Self> {
        Ok(Self {
            name: Ident::new(name).map_err(|e| AuditError::config(e.to_string()))?,
            data_type: data_type.to_string(),
            definition: definition.into(),
        })
    }
}

/// A shared table with its columns and indexes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTemplate {
    pub name: QualifiedName,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<Template>,
}

impl TableTemplate {
    pub fn object(&self) -> CatalogObject {
        CatalogObject::Table(self.name.clone())
    }

    pub fn up(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {} {}", c.name, c.definition))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("CREATE TABLE {} (\n{}\n)", self.name, columns)
    }

    pub fn down(&self) -> String {
        format!("DROP TABLE {}", self.name)
    }
}

pub fn schema(names: &AuditNames) -> Template {
    Template {
        object: CatalogObject::Schema(names.schema().clone()),
        up: format!("CREATE SCHEMA {}", names.schema()),
        down: format!("DROP SCHEMA {}", names.schema()),
    }
}

pub fn action_type(names: &AuditNames) -> Template {
    let name = names.object(ACTION_TYPE);
    Template {
        object: CatalogObject::EnumType(names.audit_table().sibling(Ident::from_static(ACTION_TYPE))),
        up: format!(
            "CREATE TYPE {} AS ENUM ('INSERT', 'SELECT', 'UPDATE', 'DELETE', 'TRUNCATE')",
            name
        ),
        down: format!("DROP TYPE {}", name),
    }
}

/// `jsonb_delete_keys(data, VARIADIC keys)`: `data` without the listed keys.
pub fn delete_keys_function(names: &AuditNames) -> Template {
    let name = names.object(DELETE_KEYS_FUNCTION);
    Template {
        object: function_object(names, DELETE_KEYS_FUNCTION, &["jsonb", "text[]"]),
        up: format!(
            r#"CREATE OR REPLACE FUNCTION {name}(_data jsonb, VARIADIC _keys text[]) RETURNS jsonb AS $body$
SELECT _data - _keys
$body$
LANGUAGE sql IMMUTABLE STRICT"#
        ),
        down: format!("DROP FUNCTION {name}(jsonb, text[])"),
    }
}

/// `jsonb_changed_values(new, old)`: entries of `new` whose value differs from `old`, or NULL
/// when nothing differs.
pub fn changed_values_function(names: &AuditNames) -> Template {
    let name = names.object(CHANGED_VALUES_FUNCTION);
    Template {
        object: function_object(names, CHANGED_VALUES_FUNCTION, &["jsonb", "jsonb"]),
        up: format!(
            r#"CREATE OR REPLACE FUNCTION {name}(_new jsonb, _old jsonb) RETURNS jsonb AS $body$
SELECT jsonb_object_agg(n.key, n.value)
FROM jsonb_each(_new) n
LEFT JOIN jsonb_each(_old) o ON o.key = n.key
WHERE n.value IS DISTINCT FROM o.value
$body$
LANGUAGE sql IMMUTABLE STRICT"#
        ),
        down: format!("DROP FUNCTION {name}(jsonb, jsonb)"),
    }
}

/// The capture trigger function.
///
/// Trigger arguments: `(log_query boolean, excluded_columns text[], log_client boolean)`.
///
/// An UPDATE that changes nothing outside the excluded columns writes no row-level record. The
/// statement trigger still writes its `statement_only` marker for that statement; markers carry
/// no row data and are not audit records of any row.
pub fn log_action_function(names: &AuditNames) -> Template {
    let name = names.object(CAPTURE_FUNCTION);
    let audit_table = names.audit_table();
    let sequence = names.action_id_sequence();
    let action_type = names.object(ACTION_TYPE);
    let delete_keys = names.object(DELETE_KEYS_FUNCTION);
    let changed_values = names.object(CHANGED_VALUES_FUNCTION);
    let setting = crate::capture::changeset::CHANGESET_SETTING;

    Template {
        object: function_object(names, CAPTURE_FUNCTION, &[]),
        up: format!(
            r#"CREATE OR REPLACE FUNCTION {name}() RETURNS trigger AS $body$
DECLARE
    audit_row {audit_table};
    excluded_cols text[] = ARRAY[]::text[];
    old_data jsonb;
    new_data jsonb;
BEGIN
    IF TG_WHEN <> 'AFTER' THEN
        RAISE EXCEPTION '[{name}] may only run as an AFTER trigger, fired %', TG_WHEN
            USING ERRCODE = 'triggered_action_exception';
    END IF;

    audit_row.action_id = nextval('{sequence}');
    audit_row.schema_name = TG_TABLE_SCHEMA::text;
    audit_row.table_name = TG_TABLE_NAME::text;
    audit_row.relation_id = TG_RELID;
    audit_row.transaction_date = current_timestamp;
    audit_row.statement_date = statement_timestamp();
    audit_row.action_date = clock_timestamp();
    audit_row.transaction_id = txid_current();
    audit_row.action_type = TG_OP::{action_type};
    audit_row.statement_only = FALSE;
    audit_row.changeset_id = NULLIF(current_setting('{setting}', true), '')::integer;

    IF TG_ARGV[0]::boolean IS NOT DISTINCT FROM TRUE THEN
        audit_row.query = current_query();
    END IF;

    IF TG_ARGV[1] IS NOT NULL THEN
        excluded_cols = TG_ARGV[1]::text[];
    END IF;

    IF TG_ARGV[2]::boolean IS NOT DISTINCT FROM TRUE THEN
        audit_row.session_user_name = session_user::text;
        audit_row.application_name = current_setting('application_name');
        audit_row.client_addr = inet_client_addr();
        audit_row.client_port = inet_client_port();
    END IF;

    audit_row.key_type = CASE
        WHEN audit_row.changeset_id IS NOT NULL THEN 'c'
        WHEN audit_row.transaction_id IS NOT NULL THEN 't'
        ELSE 'a'
    END;

    IF TG_LEVEL = 'ROW' AND TG_OP = 'UPDATE' THEN
        old_data = {delete_keys}(to_jsonb(OLD), VARIADIC excluded_cols);
        new_data = {delete_keys}(to_jsonb(NEW), VARIADIC excluded_cols);
        audit_row.row_data = old_data;
        audit_row.changed_fields = {changed_values}(new_data, old_data);
        IF audit_row.changed_fields IS NULL THEN
            RETURN NULL;
        END IF;
    ELSIF TG_LEVEL = 'ROW' AND TG_OP = 'DELETE' THEN
        audit_row.row_data = {delete_keys}(to_jsonb(OLD), VARIADIC excluded_cols);
    ELSIF TG_LEVEL = 'ROW' AND TG_OP = 'INSERT' THEN
        audit_row.row_data = {delete_keys}(to_jsonb(NEW), VARIADIC excluded_cols);
    ELSIF TG_LEVEL = 'STATEMENT' AND TG_OP IN ('INSERT', 'UPDATE', 'DELETE', 'TRUNCATE') THEN
        audit_row.statement_only = TRUE;
    ELSE
        RAISE EXCEPTION '[{name}] unhandled trigger case: %, %', TG_OP, TG_LEVEL
            USING ERRCODE = 'triggered_action_exception';
    END IF;

    INSERT INTO {audit_table} VALUES (audit_row.*);
    RETURN NULL;
END;
$body$
LANGUAGE plpgsql VOLATILE SECURITY DEFINER"#
        ),
        down: format!("DROP FUNCTION {name}()"),
    }
}

/// Capture functions in creation order.
pub fn functions(names: &AuditNames) -> Vec<Template> {
    vec![
        delete_keys_function(names),
        changed_values_function(names),
        log_action_function(names),
    ]
}

pub fn changeset_table(names: &AuditNames) -> AuditResult<TableTemplate> {
    let table = names.changeset_table().clone();
    let columns = vec![
        ColumnDef::new("id", "integer", "serial NOT NULL PRIMARY KEY")?,
        ColumnDef::new("transaction_id", "bigint", "bigint")?,
        ColumnDef::new("user_id", "integer", "integer")?,
        ColumnDef::new("session_id", "text", "text")?,
        ColumnDef::new(
            "request_date",
            "timestamp with time zone",
            "timestamp with time zone NOT NULL",
        )?,
        ColumnDef::new("request_url", "text", "text")?,
        ColumnDef::new("request_addr", "inet", "inet")?,
    ];

    let indexes = ["transaction_id", "user_id", "session_id", "request_url", "request_addr"]
        .into_iter()
        .map(|column| index(&table, column, &format!("({})", column)))
        .collect::<AuditResult<Vec<_>>>()?;

    Ok(TableTemplate {
        name: table,
        columns,
        indexes,
    })
}

pub fn audit_table(names: &AuditNames) -> AuditResult<TableTemplate> {
    let table = names.audit_table().clone();
    let action_type = names.object(ACTION_TYPE);
    let columns = vec![
        ColumnDef::new("action_id", "bigint", "bigserial NOT NULL PRIMARY KEY")?,
        ColumnDef::new("schema_name", "text", "text NOT NULL")?,
        ColumnDef::new("table_name", "text", "text NOT NULL")?,
        ColumnDef::new("relation_id", "oid", "oid NOT NULL")?,
        ColumnDef::new(
            "transaction_date",
            "timestamp with time zone",
            "timestamp with time zone NOT NULL",
        )?,
        ColumnDef::new(
            "statement_date",
            "timestamp with time zone",
            "timestamp with time zone NOT NULL",
        )?,
        ColumnDef::new(
            "action_date",
            "timestamp with time zone",
            "timestamp with time zone NOT NULL",
        )?,
        ColumnDef::new("transaction_id", "bigint", "bigint")?,
        ColumnDef::new("session_user_name", "text", "text")?,
        ColumnDef::new("application_name", "text", "text")?,
        ColumnDef::new("client_addr", "inet", "inet")?,
        ColumnDef::new("client_port", "integer", "integer")?,
        ColumnDef::new("query", "text", "text")?,
        ColumnDef::new("action_type", &action_type, format!("{} NOT NULL", action_type))?,
        ColumnDef::new("row_data", "jsonb", "jsonb")?,
        ColumnDef::new("changed_fields", "jsonb", "jsonb")?,
        ColumnDef::new("statement_only", "boolean", "boolean NOT NULL DEFAULT FALSE")?,
        ColumnDef::new(
            "key_type",
            "character(1)",
            "character(1) NOT NULL CHECK (key_type IN ('c', 't', 'a'))",
        )?,
        ColumnDef::new(
            "changeset_id",
            "integer",
            format!(
                "integer REFERENCES {} (id) ON UPDATE CASCADE ON DELETE CASCADE",
                names.changeset_table()
            ),
        )?,
    ];

    let indexes = vec![
        index(&table, "schema_name_table_name", "(schema_name, table_name)")?,
        index(&table, "relation_id", "(relation_id)")?,
        index(&table, "statement_date", "(statement_date)")?,
        index(&table, "action_type", "(action_type)")?,
        index(&table, "key_type", "(key_type)")?,
        index(&table, "statement_only", "(statement_only)")?,
        index(&table, "row_data", "USING GIN (row_data jsonb_path_ops)")?,
        index(
            &table,
            "unit_key",
            "(key_type, (CASE key_type WHEN 'c' THEN changeset_id WHEN 't' THEN transaction_id ELSE action_id END))",
        )?,
        index(&table, "changeset_id", "(changeset_id)")?,
    ];

    Ok(TableTemplate {
        name: table,
        columns,
        indexes,
    })
}

/// Arguments both capture triggers pass to the capture function, as stored in `pg_trigger.tgargs`.
pub fn trigger_arguments(entity: &TrackedEntity) -> Vec<String> {
    let columns = entity
        .excluded_columns
        .iter()
        .map(Ident::as_str)
        .collect::<Vec<_>>()
        .join(",");
    vec![
        entity.log_query.to_string(),
        format!("{{{}}}", columns),
        entity.log_client.to_string(),
    ]
}

/// `CREATE TRIGGER` for one capture trigger with the given function arguments.
pub fn create_trigger(
    names: &AuditNames,
    table: &QualifiedName,
    trigger: &str,
    arguments: &[String],
) -> String {
    let level = if trigger == ROW_TRIGGER { "ROW" } else { "STATEMENT" };
    let arguments = arguments
        .iter()
        .map(|a| format!("'{}'", a.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {table}\n    FOR EACH {level} EXECUTE PROCEDURE {function}({arguments})",
        function = names.object(CAPTURE_FUNCTION),
    )
}

/// Row and statement triggers for a tracked table, in creation order.
pub fn triggers(names: &AuditNames, entity: &TrackedEntity) -> Vec<Template> {
    let arguments = trigger_arguments(entity);

    [ROW_TRIGGER, STATEMENT_TRIGGER]
        .into_iter()
        .map(|trigger| Template {
            object: CatalogObject::Trigger {
                table: entity.table.clone(),
                name: Ident::from_static(trigger),
            },
            up: create_trigger(names, &entity.table, trigger, &arguments),
            down: format!("DROP TRIGGER {} ON {}", trigger, entity.table),
        })
        .collect()
}

/// `ALTER TABLE ... ENABLE|DISABLE TRIGGER` for one trigger.
pub fn toggle_trigger(table: &QualifiedName, trigger: &str, enable: bool) -> String {
    let verb = if enable { "ENABLE" } else { "DISABLE" };
    format!("ALTER TABLE {} {} TRIGGER {}", table, verb, trigger)
}

/// [`toggle_trigger`] for both capture triggers.
pub fn toggle_triggers(entity: &TrackedEntity, enable: bool) -> Vec<String> {
    [ROW_TRIGGER, STATEMENT_TRIGGER]
        .into_iter()
        .map(|trigger| toggle_trigger(&entity.table, trigger, enable))
        .collect()
}

pub fn capture_function_name(names: &AuditNames) -> QualifiedName {
    names.audit_table().sibling(Ident::from_static(CAPTURE_FUNCTION))
}

fn function_object(names: &AuditNames, function: &'static str, args: &[&str]) -> CatalogObject {
    CatalogObject::Function {
        name: names.audit_table().sibling(Ident::from_static(function)),
        args: args.iter().map(|a| a.to_string()).collect(),
    }
}

fn index(table: &QualifiedName, suffix: &str, definition: &str) -> AuditResult<Template> {
    let name = Ident::new(format!("{}_{}_idx", table.name(), suffix)).map_err(|e| {
        AuditError::config(format!("Cannot name index on {}: {}", table, e))
    })?;
    Ok(Template {
        up: format!("CREATE INDEX {} ON {} {}", name, table, definition),
        down: format!("DROP INDEX {}.{}", table.schema(), name),
        object: CatalogObject::Index {
            table: table.clone(),
            name,
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pgtrail_common::ident::is_valid;

    fn names() -> AuditNames {
        AuditNames::parse("audits.logged_actions", "audits.changesets").unwrap()
    }

    fn post() -> TrackedEntity {
        let mut post = TrackedEntity::new("post", "public.posts".parse().unwrap());
        post.excluded_columns = vec![
            Ident::new("updated_at").unwrap(),
            Ident::new("search").unwrap(),
        ];
        post.log_query = true;
        post
    }

    #[test]
    fn test_built_in_identifiers_are_valid() {
        for name in [
            ROW_TRIGGER,
            STATEMENT_TRIGGER,
            CAPTURE_FUNCTION,
            DELETE_KEYS_FUNCTION,
            CHANGED_VALUES_FUNCTION,
            ACTION_TYPE,
        ] {
            assert!(is_valid(name), "{name}");
        }
    }

    #[test]
    fn test_templates_are_deterministic() {
        assert_eq!(log_action_function(&names()), log_action_function(&names()));
        assert_eq!(audit_table(&names()).unwrap(), audit_table(&names()).unwrap());
        assert_eq!(triggers(&names(), &post()), triggers(&names(), &post()));
    }

    #[test]
    fn test_schema_and_type() {
        assert_eq!(schema(&names()).up, "CREATE SCHEMA audits");
        let action_type = action_type(&names());
        assert_eq!(action_type.down, "DROP TYPE audits.action_type");
        assert!(action_type.up.contains("'INSERT', 'SELECT', 'UPDATE', 'DELETE', 'TRUNCATE'"));
    }

    #[test]
    fn test_capture_function_targets_configured_names() {
        let names = AuditNames::parse("history.actions", "history.batches").unwrap();
        let function = log_action_function(&names);

        assert!(function.up.contains("audit_row history.actions;"));
        assert!(function.up.contains("nextval('history.actions_action_id_seq')"));
        assert!(function.up.contains("INSERT INTO history.actions VALUES (audit_row.*)"));
        assert!(function.up.contains("current_setting('audit.changeset_id', true)"));
        assert!(function.up.contains("USING ERRCODE = 'triggered_action_exception'"));
        assert!(function.up.contains("SECURITY DEFINER"));
        assert_eq!(function.down, "DROP FUNCTION history.log_action()");
    }

    #[test]
    fn test_capture_function_excludes_before_diffing() {
        let up = log_action_function(&names()).up;
        let old = up.find("old_data = audits.jsonb_delete_keys(to_jsonb(OLD)").unwrap();
        let diff = up.find("audits.jsonb_changed_values(new_data, old_data)").unwrap();
        let suppress = up.find("IF audit_row.changed_fields IS NULL THEN").unwrap();
        assert!(old < diff && diff < suppress);
    }

    #[test]
    fn test_changeset_table() {
        let table = changeset_table(&names()).unwrap();
        let up = table.up();
        assert!(up.starts_with("CREATE TABLE audits.changesets ("));
        assert!(up.contains("    id serial NOT NULL PRIMARY KEY,"));
        assert!(up.contains("    request_addr inet\n)"));
        assert_eq!(table.indexes.len(), 5);
        assert_eq!(
            table.indexes[1].up,
            "CREATE INDEX changesets_user_id_idx ON audits.changesets (user_id)"
        );
        assert_eq!(table.indexes[1].down, "DROP INDEX audits.changesets_user_id_idx");
    }

    #[test]
    fn test_audit_table_unit_key_index() {
        let table = audit_table(&names()).unwrap();
        let unit_key = table
            .indexes
            .iter()
            .find(|i| i.up.contains("logged_actions_unit_key_idx"))
            .unwrap();
        assert!(unit_key.up.contains(
            "(key_type, (CASE key_type WHEN 'c' THEN changeset_id WHEN 't' THEN transaction_id ELSE action_id END))"
        ));

        let action_type = table.columns.iter().find(|c| c.name.as_str() == "action_type").unwrap();
        assert_eq!(action_type.data_type, "audits.action_type");
        assert!(table.up().contains("REFERENCES audits.changesets (id)"));
    }

    #[test]
    fn test_overlong_index_name_is_config_error() {
        let long = format!("audits.{}", "t".repeat(60));
        let names = AuditNames::parse(&long, "audits.changesets").unwrap();
        assert!(matches!(audit_table(&names), Err(AuditError::Config(_))));
    }

    #[test]
    fn test_triggers() {
        let triggers = triggers(&names(), &post());
        assert_eq!(triggers.len(), 2);
        assert_eq!(
            triggers[0].up,
            "CREATE TRIGGER log_action_row_trigger AFTER INSERT OR UPDATE OR DELETE ON public.posts\n    FOR EACH ROW EXECUTE PROCEDURE audits.log_action('true', '{updated_at,search}', 'false')"
        );
        assert!(triggers[1].up.contains("FOR EACH STATEMENT"));
        assert_eq!(triggers[1].down, "DROP TRIGGER log_action_stmt_trigger ON public.posts");
    }

    #[test]
    fn test_trigger_arguments() {
        assert_eq!(trigger_arguments(&post()), vec!["true", "{updated_at,search}", "false"]);

        let plain = TrackedEntity::new("tag", "public.tags".parse().unwrap());
        assert_eq!(trigger_arguments(&plain)[1], "{}");

        let sql = create_trigger(
            &names(),
            &"public.tags".parse().unwrap(),
            STATEMENT_TRIGGER,
            &["it's".to_string()],
        );
        assert!(sql.ends_with("FOR EACH STATEMENT EXECUTE PROCEDURE audits.log_action('it''s')"));
    }

    #[test]
    fn test_toggle_triggers() {
        assert_eq!(
            toggle_triggers(&post(), false),
            vec![
                "ALTER TABLE public.posts DISABLE TRIGGER log_action_row_trigger",
                "ALTER TABLE public.posts DISABLE TRIGGER log_action_stmt_trigger",
            ]
        );
    }
}
