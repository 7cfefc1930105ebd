//! `pgtrail status` command implementation

use crate::context::Context;
use crate::error::Result;
use colored::Colorize;
use pgtrail_server::catalog::PgCatalog;
use pgtrail_server::installer::{EntityStatus, ObjectStatus, Reconciler, StatusReport};

pub async fn run(ctx: &Context) -> Result<()> {
    let pool = ctx.connect().await?;
    let catalog = PgCatalog::new(pool);
    let report = Reconciler::new(&catalog, &ctx.names, &ctx.registry)
        .report()
        .await?;

    print!("{}", render(&report));
    Ok(())
}

/// Report text, one line per object.
pub fn render(report: &StatusReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("{}\n", "Shared objects:".cyan().bold()));
    for object in &report.shared {
        out.push_str(&format!("  {}\n", object_line(object)));
    }

    for entity in &report.entities {
        out.push('\n');
        out.push_str(&format!("{}\n", entity_header(entity)));
        if !entity.table_exists {
            out.push_str(&format!("  {}\n", "table does not exist".red()));
            continue;
        }
        for trigger in &entity.triggers {
            out.push_str(&format!("  {}\n", object_line(trigger)));
        }
    }

    let missing = report.missing().count();
    let mismatched = report.mismatched().count();
    out.push('\n');
    if report.is_complete() {
        out.push_str(&format!("{}\n", "All audit objects are installed.".green()));
    } else {
        out.push_str(&format!(
            "{}\n",
            format!(
                "{} object(s) missing, {} out of date. Run 'pgtrail install <entity>' to repair them.",
                missing, mismatched
            )
            .yellow()
        ));
    }
    out
}

fn object_line(object: &ObjectStatus) -> String {
    match (&object.mismatch, object.present) {
        (Some(mismatch), _) => {
            format!("[{}] {} {}: {}", "mismatch".yellow(), object.kind, object.name, mismatch)
        },
        (None, true) => format!("[{}] {} {}", "ok".green(), object.kind, object.name),
        (None, false) => format!("[{}] {} {}", "missing".red(), object.kind, object.name),
    }
}

fn entity_header(entity: &EntityStatus) -> String {
    let tracking = match entity.tracking {
        Some(true) => "tracking enabled".green(),
        Some(false) => "tracking disabled".yellow(),
        None => "not installed".red(),
    };
    format!("{} ({}): {}", entity.entity.bold(), entity.table, tracking)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn object(name: &str, present: bool) -> ObjectStatus {
        ObjectStatus {
            kind: "table",
            name: name.to_string(),
            present,
            mismatch: None,
        }
    }

    #[test]
    fn test_render_lists_each_missing_object() {
        colored::control::set_override(false);
        let report = StatusReport {
            shared: vec![object("audits.changesets", true), object("audits.logged_actions", false)],
            entities: vec![
                EntityStatus {
                    entity: "post".into(),
                    table: "public.posts".into(),
                    table_exists: true,
                    triggers: vec![
                        ObjectStatus {
                            kind: "trigger",
                            name: "log_action_row_trigger on public.posts".into(),
                            present: false,
                            mismatch: None,
                        },
                        ObjectStatus {
                            kind: "trigger",
                            name: "log_action_stmt_trigger on public.posts".into(),
                            present: true,
                            mismatch: Some("passes (false, {}, false), expected (false, {ssn}, false)".into()),
                        },
                    ],
                    tracking: None,
                },
                EntityStatus {
                    entity: "tag".into(),
                    table: "public.tags".into(),
                    table_exists: false,
                    triggers: Vec::new(),
                    tracking: None,
                },
            ],
        };

        let text = render(&report);
        assert!(text.contains("[ok] table audits.changesets"));
        assert!(text.contains("[missing] table audits.logged_actions"));
        assert!(text.contains("[missing] trigger log_action_row_trigger on public.posts"));
        assert!(text.contains("post (public.posts): not installed"));
        assert!(text.contains("table does not exist"));
        assert!(text.contains(
            "[mismatch] trigger log_action_stmt_trigger on public.posts: passes (false, {}, false)"
        ));
        assert!(text.contains("2 object(s) missing, 1 out of date"));
    }
}
