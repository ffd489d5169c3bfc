//! Multivariate statistics objects: the definition statement followed by an
//! update restoring the built payloads.

use super::{quote_literal, NULL};
use crate::catalog::ExtendedStatisticsObject;
use std::fmt;
use tracing::warn;

pub const UNKNOWN_KIND: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExtendedStatistics {
    pub name: String,
    pub kind: String,
    pub definition: String,
    pub update: String,
}

impl fmt::Display for EncodedExtendedStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--")?;
        writeln!(f, "-- Name: {}; Type: STATISTICS {}", self.name, self.kind)?;
        writeln!(f, "--")?;
        writeln!(f, "{}", self.definition)?;
        writeln!(f, "{}", self.update)
    }
}

pub fn encode_extended_statistics(object: &ExtendedStatisticsObject) -> EncodedExtendedStatistics {
    let kind = statistics_kind(&object.definition).unwrap_or_else(|| {
        warn!(
            name = %object.name,
            definition = %object.definition,
            "unrecognised statistics definition layout, kind left unknown"
        );
        UNKNOWN_KIND.to_string()
    });

    let definition = object.definition.trim_end();
    let definition = if definition.ends_with(';') {
        definition.to_string()
    } else {
        format!("{};", definition)
    };

    // The target assigns its own identifier to the object, so it is resolved
    // through schema, relation and object name.
    let update = format!(
        "UPDATE pg_statistic_ext_data SET\n\
         \tstxdndistinct = {},\n\
         \tstxddependencies = {},\n\
         \tstxdmcv = {}\n\
         WHERE stxoid = (SELECT s.oid FROM pg_statistic_ext s \
         JOIN pg_class c ON c.oid = s.stxrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = {} AND c.relname = {} AND s.stxname = {});",
        payload(object.ndistinct.as_deref(), "pg_ndistinct"),
        payload(object.dependencies.as_deref(), "pg_dependencies"),
        payload(object.mcv.as_deref(), "pg_mcv_list"),
        quote_literal(&object.relation.schema),
        quote_literal(&object.relation.name),
        quote_literal(&object.name),
    );

    EncodedExtendedStatistics {
        name: object.name.clone(),
        kind,
        definition,
        update,
    }
}

fn payload(value: Option<&str>, type_name: &str) -> String {
    match value {
        Some(v) => format!("{}::{}", quote_literal(v), type_name),
        None => NULL.to_string(),
    }
}

/// Kind label taken positionally from `CREATE STATISTICS <name> [(<kinds>)] ON ...`.
///
/// This trusts the token layout of the server's definition renderer; `None`
/// means the layout did not match.
pub fn statistics_kind(definition: &str) -> Option<String> {
    let tokens: Vec<&str> = definition.split_whitespace().collect();
    if tokens.len() < 4
        || !tokens[0].eq_ignore_ascii_case("CREATE")
        || !tokens[1].eq_ignore_ascii_case("STATISTICS")
    {
        return None;
    }
    if tokens[3].eq_ignore_ascii_case("ON") {
        return Some("(all)".to_string());
    }
    if !tokens[3].starts_with('(') {
        return None;
    }
    let mut kinds = Vec::new();
    for token in &tokens[3..] {
        kinds.push(*token);
        if token.ends_with(')') {
            return Some(kinds.join(" "));
        }
    }
    None
}
