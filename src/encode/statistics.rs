//! Per-column statistics as a delete/insert statement pair.
//!
//! Relations outside the system namespaces were just created empty by the
//! DDL import, so their delete is written as a comment. System relations may
//! already carry a default row on a fresh instance and get a live delete.

use super::array::{array_literal, bytea_array_literal};
use super::{cast_or_null, quote_ident, quote_literal, NULL};
use crate::catalog::{
    AttributeType, RelationName, ScalarArray, SlotTreatment, SlotValues, StatisticsRow,
    StatisticsSlot,
};
use crate::config::ReproConfig;
use std::fmt;

const REDACTED_NUMBERS: &str = "'{0}'::real[]";
const REDACTED_VALUES: &str = "NULL::bytea[]";

#[derive(Debug, Clone)]
pub struct StatisticsEncoder<'a> {
    pub include_sketches: bool,
    pub system_namespaces: &'a [String],
}

impl<'a> StatisticsEncoder<'a> {
    pub fn from_config(config: &'a ReproConfig) -> Self {
        Self {
            include_sketches: config.include_sketches,
            system_namespaces: &config.system_namespaces,
        }
    }

    pub fn encode(&self, row: &StatisticsRow) -> EncodedStatistics {
        let relation_key = relation_key(&row.relation);
        let delete = format!(
            "DELETE FROM pg_statistic WHERE starelid={} AND staattnum={};",
            relation_key, row.attribute_number
        );

        let mut columns = vec![
            relation_key,
            format!("{}::smallint", row.attribute_number),
            cast_or_null(row.inherited, "boolean"),
            cast_or_null(row.null_fraction, "real"),
            cast_or_null(row.average_width, "integer"),
            cast_or_null(row.distinct_estimate, "real"),
        ];
        columns.extend(row.slots.iter().map(|s| cast_or_null(s.kind, "smallint")));
        columns.extend(row.slots.iter().map(|s| cast_or_null(s.operator, "oid")));
        columns.extend(row.slots.iter().map(|s| cast_or_null(s.collation, "oid")));
        columns.extend(row.slots.iter().map(|s| self.numbers_column(s)));
        columns.extend(
            row.slots
                .iter()
                .map(|s| self.values_column(s, &row.attribute_type)),
        );

        let insert = format!(
            "INSERT INTO pg_statistic VALUES (\n\t{}\n);",
            columns.join(",\n\t")
        );

        EncodedStatistics {
            relation: row.relation.clone(),
            attribute_number: row.attribute_number,
            attribute_name: row.attribute_name.clone(),
            delete_is_live: self.system_namespaces.contains(&row.relation.schema),
            delete,
            insert,
        }
    }

    fn numbers_column(&self, slot: &StatisticsSlot) -> String {
        if self.redacts(slot) {
            return REDACTED_NUMBERS.to_string();
        }
        match &slot.numbers {
            Some(numbers) => format!("{}::real[]", array_literal(&ScalarArray::from_numbers(numbers))),
            None => NULL.to_string(),
        }
    }

    fn values_column(&self, slot: &StatisticsSlot, attribute_type: &AttributeType) -> String {
        if self.redacts(slot) {
            return REDACTED_VALUES.to_string();
        }
        match (slot.slot_kind().treatment(), &slot.values) {
            (_, None) => NULL.to_string(),
            (_, Some(SlotValues::Sketch(payload))) => {
                format!("{}::bytea[]", bytea_array_literal(payload))
            }
            (SlotTreatment::Sketch(_), Some(SlotValues::Array(values))) => {
                format!("{}::bytea[]", array_literal(values))
            }
            (SlotTreatment::Default, Some(SlotValues::Array(values))) => {
                typed_array(&array_literal(values), attribute_type)
            }
        }
    }

    fn redacts(&self, slot: &StatisticsSlot) -> bool {
        !self.include_sketches && matches!(slot.slot_kind().treatment(), SlotTreatment::Sketch(_))
    }
}

/// Encode one row with sketches redacted unless `include_sketches` is set.
pub fn encode_statistics(
    row: &StatisticsRow,
    include_sketches: bool,
    system_namespaces: &[String],
) -> EncodedStatistics {
    StatisticsEncoder {
        include_sketches,
        system_namespaces,
    }
    .encode(row)
}

// regclass input splits the constant with identifier rules, so each part is
// quoted as an identifier before the whole name is escaped as a literal.
fn relation_key(relation: &RelationName) -> String {
    let qualified = format!(
        "{}.{}",
        quote_ident(&relation.schema),
        quote_ident(&relation.name)
    );
    format!("{}::regclass", quote_literal(&qualified))
}

// array_in returns anyarray, which cannot be cast to a concrete array type;
// the result goes into the anyarray column as is. Array columns hold arrays of
// arrays, so their element type is the column type itself.
fn typed_array(literal: &str, attribute_type: &AttributeType) -> String {
    if attribute_type.is_builtin() && !attribute_type.is_array() {
        format!("{}::{}", literal, attribute_type.values_type())
    } else {
        format!(
            "array_in({}, {}::regtype, -1)",
            literal,
            quote_literal(&attribute_type.name)
        )
    }
}

/// Statement pair for one (relation, attribute).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStatistics {
    pub relation: RelationName,
    pub attribute_number: i16,
    pub attribute_name: String,
    pub delete_is_live: bool,
    pub delete: String,
    pub insert: String,
}

impl fmt::Display for EncodedStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--")?;
        writeln!(
            f,
            "-- Table: {}, Attribute: {}",
            self.relation, self.attribute_name
        )?;
        writeln!(f, "--")?;
        if self.delete_is_live {
            writeln!(f, "{}", self.delete)?;
        } else {
            writeln!(f, "-- {}", self.delete)?;
        }
        writeln!(f, "{}", self.insert)
    }
}
