use super::quote_literal;
use crate::catalog::TableCardinality;

/// Table-level size estimates, keyed by name because relation identifiers
/// differ once the DDL has been replayed.
pub fn encode_cardinality(table: &TableCardinality) -> String {
    format!(
        "UPDATE pg_class\nSET\n\
         \trelpages = {}::int,\n\
         \treltuples = {}::real,\n\
         \trelallvisible = {}::int\n\
         WHERE relname = {} AND relnamespace = \
         (SELECT oid FROM pg_namespace WHERE nspname = {});",
        table.page_count,
        table.row_estimate,
        table.visible_page_count,
        quote_literal(&table.relation.name),
        quote_literal(&table.relation.schema),
    )
}
