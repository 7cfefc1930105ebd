//! Search filters for history queries

use super::models::ActionType;
use crate::error::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Criteria a unit of work must match through at least one of its records
///
/// Empty lists and `None` values do not filter. Changeset criteria (request url, user ids,
/// request addresses) only match records captured inside a changeset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionFilter {
    /// Inclusive lower bound on the action date
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the action date
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the changeset request url
    pub request_url: Option<String>,
    pub user_ids: Vec<i32>,
    pub request_addrs: Vec<String>,
    /// Entity names or `schema.table` names
    pub tables: Vec<String>,
    pub action_types: Vec<ActionType>,
    /// Records whose `changed_fields` contain any of these attributes
    pub attributes: Vec<String>,
    /// Case-insensitive substring of any captured value
    pub value: Option<String>,
}

impl ActionFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> AuditResult<()> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AuditError::input(format!(
                    "Date range is inverted: from {} is after to {}",
                    from, to
                )));
            }
        }

        for addr in &self.request_addrs {
            addr.parse::<IpAddr>().map_err(|_| {
                AuditError::input(format!("Invalid request address '{}'", addr))
            })?;
        }

        if matches!(self.request_url.as_deref(), Some(url) if url.trim().is_empty()) {
            return Err(AuditError::input("Request url filter cannot be empty"));
        }

        if matches!(self.value.as_deref(), Some(value) if value.trim().is_empty()) {
            return Err(AuditError::input("Value filter cannot be empty"));
        }

        if self.attributes.iter().any(|a| a.trim().is_empty()) {
            return Err(AuditError::input("Attribute names cannot be empty"));
        }

        if self.tables.iter().any(|t| t.trim().is_empty()) {
            return Err(AuditError::input("Table names cannot be empty"));
        }

        Ok(())
    }
}

/// Escape `%`, `_` and `\` and wrap the text for an `ILIKE` substring match.
pub fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
