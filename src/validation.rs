//! Identifier checks and quoting for every table and column name that is
//! interpolated into SQL. All statement builders go through this module.
//! Table names supplied by callers must match a plain identifier pattern;
//! column names are only ever taken from introspected schemas and are quoted.
//!
//! Join conditions are not covered here: they are raw boolean expressions
//! supplied by the caller and are interpolated unchecked.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{Error, Result};

static TABLE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)?$")
        .expect("TABLE_NAME_REGEX pattern is valid")
});

const MAX_IDENTIFIER_LEN: usize = 128;

/// Accepts `table` or `database.table`.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN || !TABLE_NAME_REGEX.is_match(name) {
        return Err(Error::InvalidIdentifier(format!(
            "Invalid table name: {}",
            name
        )));
    }
    Ok(())
}

pub fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Quotes each dotted part separately: `db.t` becomes `"db"."t"`.
pub fn quote_table_name(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

/// Splits `db.t` into `(Some("db"), "t")`.
pub fn split_table_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((db, table)) => (Some(db), table),
        None => (None, name),
    }
}

pub fn validate_delimiter(delimiter: char) -> Result<u8> {
    if !delimiter.is_ascii() || delimiter == '\n' || delimiter == '\r' {
        return Err(Error::InvalidRequest(format!(
            "Delimiter must be a single-byte character other than a line break, got {:?}",
            delimiter
        )));
    }
    Ok(delimiter as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_table_name_valid() {
        assert!(validate_table_name("users").is_ok());
        assert!(validate_table_name("_staging").is_ok());
        assert!(validate_table_name("analytics.events_2024").is_ok());
    }

    #[test]
    fn test_validate_table_name_invalid() {
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1users").is_err());
        assert!(validate_table_name("users; DROP TABLE x").is_err());
        assert!(validate_table_name("a.b.c").is_err());
        assert!(validate_table_name("users`").is_err());
    }

    #[test]
    fn test_validate_table_name_too_long() {
        let long_name = "a".repeat(129);
        assert!(matches!(
            validate_table_name(&long_name),
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_table_name_qualified() {
        assert_eq!(quote_table_name("db.users"), "\"db\".\"users\"");
        assert_eq!(quote_table_name("users"), "\"users\"");
    }

    #[test]
    fn test_split_table_name() {
        assert_eq!(split_table_name("db.users"), (Some("db"), "users"));
        assert_eq!(split_table_name("users"), (None, "users"));
    }

    #[test]
    fn test_validate_delimiter() {
        assert_eq!(validate_delimiter(',').unwrap(), b',');
        assert_eq!(validate_delimiter('\t').unwrap(), b'\t');
        assert!(validate_delimiter('\n').is_err());
        assert!(validate_delimiter('€').is_err());
    }
}
