//! Table names that are safe to interpolate into SQL.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid table name '{0}': expected [schema.]name using lowercase letters, digits and '_'")]
pub struct IdentifierError(String);

/// A validated, optionally schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let invalid = || IdentifierError(s.to_string());

        let (schema, name) = match s.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, s),
        };

        if !is_identifier(name) || schema.is_some_and(|schema| !is_identifier(schema)) {
            return Err(invalid());
        }

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Unqualified name, used to derive index names.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Double-quoted form for use in SQL text.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{schema}\".\"{}\"", self.name),
            None => format!("\"{}\"", self.name),
        }
    }

    /// Quoted name of an index on this table.
    pub fn index(&self, suffix: &str) -> String {
        format!("\"{}_{suffix}\"", self.name)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    s.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl FromStr for TableName {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_qualified_names() {
        let t = TableName::parse("user_snapshots").unwrap();
        assert_eq!(t.quoted(), "\"user_snapshots\"");
        assert_eq!(t.index("status_idx"), "\"user_snapshots_status_idx\"");

        let t: TableName = "sync.audit_log".parse().unwrap();
        assert_eq!(t.quoted(), "\"sync\".\"audit_log\"");
        assert_eq!(t.name(), "audit_log");
        assert_eq!(t.to_string(), "sync.audit_log");
    }

    #[test]
    fn test_rejects_injection_and_odd_names() {
        for bad in [
            "",
            "users; DROP TABLE users",
            "Users",
            "1users",
            "a.b.c",
            "users\"",
            ".users",
            "users.",
        ] {
            assert!(TableName::parse(bad).is_err(), "accepted {bad:?}");
        }
        assert!(TableName::parse(&"a".repeat(64)).is_err());
        assert!(TableName::parse(&"a".repeat(63)).is_ok());
    }
}
