//! Statement encoders. Each one turns a catalog record into SQL text that
//! recreates the same metadata on another instance.

pub mod array;
pub mod cardinality;
pub mod extended;
pub mod statistics;

use std::fmt::Display;

pub use array::{array_literal, bytea_array_literal};
pub use cardinality::encode_cardinality;
pub use extended::{encode_extended_statistics, EncodedExtendedStatistics};
pub use statistics::{encode_statistics, EncodedStatistics};

pub const NULL: &str = "NULL";

/// Single-quoted string constant with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Identifier, double-quoted unless it is a plain lower-case name.
pub fn quote_ident(value: &str) -> String {
    let plain = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', "\"\""))
    }
}

/// `value::type`, or an untyped `NULL` when the value is absent.
pub fn cast_or_null<T: Display>(value: Option<T>, sql_type: &str) -> String {
    match value {
        Some(v) => format!("{}::{}", v, sql_type),
        None => NULL.to_string(),
    }
}

/// Prefix every line with a SQL comment marker.
pub fn comment_lines(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                "--".to_string()
            } else {
                format!("-- {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("orders"), "'orders'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("sales"), "sales");
        assert_eq!(quote_ident("Sales"), "\"Sales\"");
        assert_eq!(quote_ident("my schema"), "\"my schema\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
    }

    #[test]
    fn test_cast_or_null() {
        assert_eq!(cast_or_null(Some(2), "smallint"), "2::smallint");
        assert_eq!(cast_or_null(None::<i32>, "integer"), "NULL");
    }

    #[test]
    fn test_comment_lines() {
        assert_eq!(comment_lines("select 1\n\nfrom t"), "-- select 1\n--\n-- from t");
    }
}
