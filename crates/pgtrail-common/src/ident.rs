//! Validated SQL identifiers
//!
//! Every schema, table, column and trigger name that ends up inside generated DDL goes through
//! [`Ident`] first. The allow-list is deliberately narrow: lower-case ASCII letters, digits and
//! underscores, starting with a letter or underscore, at most 63 bytes (PostgreSQL's
//! `NAMEDATALEN - 1`). Names that pass can be interpolated unquoted and compare equal to what
//! the catalog stores.
//!
//! # Example
//!
//! ```
//! use pgtrail_common::ident::{Ident, QualifiedName};
//!
//! let table: QualifiedName = "public.posts".parse().unwrap();
//! assert_eq!(table.schema().as_str(), "public");
//! assert_eq!(table.to_string(), "public.posts");
//!
//! assert!(Ident::new("posts; DROP TABLE users").is_err());
//! ```

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum identifier length accepted by PostgreSQL without truncation.
pub const MAX_IDENT_LEN: usize = 63;

/// Schema used when a table reference carries no schema.
pub const DEFAULT_SCHEMA: &str = "public";

/// A single validated SQL identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ident(String);

impl Ident {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self(raw))
    }

    /// Identifier from a compile-time literal such as a built-in trigger name.
    pub fn from_static(raw: &'static str) -> Self {
        debug_assert!(is_valid(raw), "invalid built-in identifier");
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Allow-list check usable in constant contexts.
pub const fn is_valid(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_IDENT_LEN {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let ok = b.is_ascii_lowercase() || b == b'_' || (i > 0 && b.is_ascii_digit());
        if !ok {
            return false;
        }
        i += 1;
    }
    true
}

fn validate(raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(CommonError::invalid_identifier(raw, "must not be empty"));
    }
    if raw.len() > MAX_IDENT_LEN {
        return Err(CommonError::invalid_identifier(
            raw,
            "must be at most 63 bytes long",
        ));
    }

    let mut chars = raw.chars();
    if let Some(first) = chars.next() {
        if !(first.is_ascii_lowercase() || first == '_') {
            return Err(CommonError::invalid_identifier(
                raw,
                "must start with a lower-case letter or underscore",
            ));
        }
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(CommonError::invalid_identifier(
            raw,
            "may only contain lower-case letters, digits and underscores",
        ));
    }

    Ok(())
}

impl FromStr for Ident {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Ident {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Ident> for String {
    fn from(value: Ident) -> Self {
        value.0
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `schema.name` pair of validated identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    schema: Ident,
    name: Ident,
}

impl QualifiedName {
    pub fn new(schema: Ident, name: Ident) -> Self {
        Self { schema, name }
    }

    /// Parse `table` or `schema.table`, using `default_schema` for the former.
    pub fn parse_with_default(raw: &str, default_schema: &str) -> Result<Self> {
        let mut parts = raw.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => Ok(Self {
                schema: Ident::new(default_schema)?,
                name: Ident::new(name)?,
            }),
            (Some(schema), Some(name), None) => Ok(Self {
                schema: Ident::new(schema)?,
                name: Ident::new(name)?,
            }),
            _ => Err(CommonError::InvalidQualifiedName(raw.to_string())),
        }
    }

    pub fn schema(&self) -> &Ident {
        &self.schema
    }

    pub fn name(&self) -> &Ident {
        &self.name
    }

    /// Same schema, different object name.
    pub fn sibling(&self, name: Ident) -> Self {
        Self {
            schema: self.schema.clone(),
            name,
        }
    }
}

impl FromStr for QualifiedName {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with_default(s, DEFAULT_SCHEMA)
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<QualifiedName> for String {
    fn from(value: QualifiedName) -> Self {
        value.to_string()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_identifiers() {
        for raw in ["posts", "_hidden", "logged_actions", "t1", "a_b_c_123"] {
            assert!(Ident::new(raw).is_ok(), "{raw} should be accepted");
        }
    }

    #[test]
    fn test_rejects_injection_attempts() {
        for raw in [
            "posts; DROP TABLE users",
            "posts--",
            "\"posts\"",
            "posts'",
            "po sts",
            "posts.id",
        ] {
            assert!(Ident::new(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_rejects_upper_case_and_leading_digit() {
        assert!(Ident::new("Posts").is_err());
        assert!(Ident::new("1posts").is_err());
        assert!(Ident::new("").is_err());
    }

    #[test]
    fn test_const_check_agrees_with_validation() {
        for raw in ["posts", "_x1", "log_action_row_trigger", "", "1a", "A", "a-b", "a.b"] {
            assert_eq!(is_valid(raw), Ident::new(raw).is_ok(), "{raw}");
        }
    }

    #[test]
    fn test_length_limit() {
        let ok = "a".repeat(MAX_IDENT_LEN);
        let too_long = "a".repeat(MAX_IDENT_LEN + 1);
        assert!(Ident::new(ok).is_ok());
        assert!(matches!(
            Ident::new(too_long),
            Err(CommonError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_qualified_name_defaults_schema() {
        let name: QualifiedName = "posts".parse().unwrap();
        assert_eq!(name.schema().as_str(), "public");
        assert_eq!(name.name().as_str(), "posts");
    }

    #[test]
    fn test_qualified_name_with_schema() {
        let name: QualifiedName = "audits.logged_actions".parse().unwrap();
        assert_eq!(name.to_string(), "audits.logged_actions");

        let sibling = name.sibling(Ident::new("changesets").unwrap());
        assert_eq!(sibling.to_string(), "audits.changesets");
    }

    #[test]
    fn test_qualified_name_rejects_extra_parts() {
        assert!(matches!(
            "a.b.c".parse::<QualifiedName>(),
            Err(CommonError::InvalidQualifiedName(_))
        ));
        assert!("audits.".parse::<QualifiedName>().is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: QualifiedName = serde_json::from_str("\"app.posts\"").unwrap();
        assert_eq!(ok.schema().as_str(), "app");

        let bad = serde_json::from_str::<QualifiedName>("\"app.Posts\"");
        assert!(bad.is_err());
    }
}
