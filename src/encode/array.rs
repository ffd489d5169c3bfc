//! Array literals in the server's textual array syntax.
//!
//! A text array is both a string constant and an array value, so each element
//! goes through two escaping passes before the whole literal is wrapped in an
//! `E'...'` constant whose backslashes are doubled once more. Numeric text
//! contains nothing special to either grammar and is emitted bare.

use crate::catalog::ScalarArray;

pub fn array_literal(values: &ScalarArray) -> String {
    match values {
        _ if values.is_empty() => "'{}'".to_string(),
        ScalarArray::Numeric(items) => format!("'{{{}}}'", items.join(",")),
        ScalarArray::Text(items) => {
            let elements = items
                .iter()
                .map(|item| format!("\"{}\"", escape_element(&item.replace('\'', "''"))))
                .collect::<Vec<_>>()
                .join(",");
            format!("E'{{{}}}'", elements.replace('\\', "\\\\"))
        }
    }
}

fn escape_element(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Byte strings as a `bytea[]`-ready literal, every byte octal-escaped.
pub fn bytea_array_literal(payload: &[Vec<u8>]) -> String {
    let escaped = payload
        .iter()
        .map(|bytes| bytes.iter().map(|b| format!("\\{:03o}", b)).collect::<String>())
        .collect();
    array_literal(&ScalarArray::Text(escaped))
}
