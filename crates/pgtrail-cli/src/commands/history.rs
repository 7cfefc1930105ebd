//! `pgtrail history` command implementation

use crate::context::Context;
use crate::error::Result;
use colored::Colorize;
use pgtrail_server::features::history::{self, parse_key, HistoryQuery};
use pgtrail_server::features::shared::{Paginated, PaginationParams};
use pgtrail_server::features::FeatureState;
use pgtrail_server::resolver::{AuditRecord, UnitOfWork};
use serde_json::Value;

pub async fn run(
    ctx: &Context,
    entity: &str,
    key: Option<&str>,
    page: i64,
    per_page: i64,
    json: bool,
) -> Result<()> {
    let entity = ctx.entity(entity)?.name.clone();
    let query = HistoryQuery {
        key: key.map(parse_key),
        pagination: PaginationParams::new(Some(page), Some(per_page)),
        ..Default::default()
    };
    query.pagination.validate()?;

    let pool = ctx.connect().await?;
    let state = FeatureState::new(pool, ctx.names.clone(), ctx.registry.clone());
    let page = history::history(&state, &entity, &query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print!("{}", render(&page));
    }
    Ok(())
}

/// Units, most recent first, each with its actions and their diffs.
pub fn render(page: &Paginated<UnitOfWork>) -> String {
    let mut out = String::new();

    if page.items.is_empty() {
        out.push_str("No history found.\n");
        return out;
    }

    for unit in &page.items {
        let mut header = format!(
            "{} {}",
            unit.key.to_string().cyan().bold(),
            unit.request_date.to_rfc3339()
        );
        if let Some(changeset) = &unit.changeset {
            if let Some(user_id) = changeset.user_id {
                header.push_str(&format!(" user={}", user_id));
            }
            if let Some(url) = &changeset.request_url {
                header.push_str(&format!(" {}", url));
            }
        }
        out.push_str(&header);
        out.push('\n');

        for record in &unit.actions {
            out.push_str(&format!("  {}\n", action_line(record)));
            for change in &record.diff {
                out.push_str(&format!(
                    "      {}: {} -> {}\n",
                    change.attribute,
                    show(change.old.as_ref()),
                    show(change.new.as_ref())
                ));
            }
        }
    }

    let meta = &page.pagination;
    out.push_str(&format!(
        "\nPage {} of {} ({} unit(s))\n",
        meta.page,
        meta.pages.max(1),
        meta.total
    ));
    out
}

fn action_line(record: &AuditRecord) -> String {
    let subject = match (&record.entity, &record.entity_key) {
        (Some(entity), Some(key)) => format!("{} {}", entity, key),
        _ => record.table(),
    };
    format!("#{} {} {}", record.action_id, record.action_type.as_str().bold(), subject)
}

fn show(value: Option<&Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pgtrail_server::capture::AttributeChange;
    use pgtrail_server::features::shared::PaginationMetadata;
    use pgtrail_server::resolver::{ActionType, ChangesetInfo, KeyType, UnitKey};
    use serde_json::json;

    fn record() -> AuditRecord {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        AuditRecord {
            action_id: 42,
            schema_name: "public".into(),
            table_name: "posts".into(),
            relation_id: 16384,
            transaction_date: date,
            statement_date: date,
            action_date: date,
            transaction_id: Some(900),
            session_user_name: None,
            application_name: None,
            client_addr: None,
            client_port: None,
            query: None,
            action_type: ActionType::Update,
            row_data: None,
            changed_fields: None,
            key: UnitKey::new(KeyType::Changeset, 3),
            changeset_id: Some(3),
            entity: Some("post".into()),
            entity_key: Some(json!({"id": 1})),
            diff: vec![AttributeChange {
                attribute: "title".into(),
                old: Some(json!("a")),
                new: Some(json!("b")),
            }],
        }
    }

    #[test]
    fn test_render_units() {
        colored::control::set_override(false);
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 11, 59, 0).unwrap();
        let unit = UnitOfWork {
            key: UnitKey::new(KeyType::Changeset, 3),
            changeset: Some(ChangesetInfo {
                id: 3,
                transaction_id: None,
                user_id: Some(7),
                session_id: None,
                request_date: date,
                request_url: Some("/posts/1/edit".into()),
                request_addr: None,
            }),
            request_date: date,
            actions: vec![record()],
        };
        let page = Paginated::new(vec![unit], PaginationMetadata::new(1, 20, 1));

        let text = render(&page);
        assert!(text.starts_with("c:3 2024-05-01T11:59:00+00:00 user=7 /posts/1/edit\n"));
        assert!(text.contains(r#"  #42 UPDATE post {"id":1}"#));
        assert!(text.contains(r#"      title: "a" -> "b""#));
        assert!(text.contains("Page 1 of 1 (1 unit(s))"));
    }

    #[test]
    fn test_render_empty_page() {
        let page: Paginated<UnitOfWork> = Paginated::new(Vec::new(), PaginationMetadata::new(1, 20, 0));
        assert_eq!(render(&page), "No history found.\n");
    }
}
