//! Named records for the catalog rows a repro needs, and the reader trait
//! that produces them.
//!
//! Every query shape binds into one of these records at the query boundary,
//! so nothing downstream indexes rows by position.

pub mod postgres;

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

pub use postgres::PgCatalog;

/// Number of parallel statistics slots on a column's statistics row.
pub const STATISTICS_SLOTS: usize = 5;

/// A relation identified by name, the way it is resolved on the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationName {
    pub schema: String,
    pub name: String,
}

impl RelationName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RelationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Declared type of a column, as rendered by `format_type` with an empty
/// search path (non-catalog types arrive schema-qualified).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeType {
    pub schema: String,
    pub name: String,
}

impl AttributeType {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Array types carry the `[]` marker in their rendered name.
    pub fn is_array(&self) -> bool {
        self.name.ends_with("[]")
    }

    pub fn is_builtin(&self) -> bool {
        self.schema == "pg_catalog"
    }

    pub fn is_json(&self) -> bool {
        matches!(self.name.as_str(), "json" | "jsonb")
    }

    /// Type of a `values` slot holding values of this column.
    pub fn values_type(&self) -> String {
        if self.is_array() {
            self.name.clone()
        } else {
            format!("{}[]", self.name)
        }
    }

    /// Element type of [`values_type`](Self::values_type).
    pub fn element_type(&self) -> &str {
        self.name.strip_suffix("[]").unwrap_or(&self.name)
    }
}

/// Cardinality-sketch variants stored in statistics slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SketchVariant {
    Summary,
    Full,
}

/// Statistical technique recorded in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Empty,
    MostCommonValues,
    Histogram,
    Correlation,
    MostCommonElements,
    DistinctElementsHistogram,
    RangeLengthHistogram,
    BoundsHistogram,
    Sketch(SketchVariant),
    Other(i16),
}

/// How the statistics encoder treats a slot's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTreatment {
    Default,
    Sketch(SketchVariant),
}

impl SlotKind {
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => SlotKind::Empty,
            1 => SlotKind::MostCommonValues,
            2 => SlotKind::Histogram,
            3 => SlotKind::Correlation,
            4 => SlotKind::MostCommonElements,
            5 => SlotKind::DistinctElementsHistogram,
            6 => SlotKind::RangeLengthHistogram,
            7 => SlotKind::BoundsHistogram,
            98 => SlotKind::Sketch(SketchVariant::Summary),
            99 => SlotKind::Sketch(SketchVariant::Full),
            other => SlotKind::Other(other),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            SlotKind::Empty => 0,
            SlotKind::MostCommonValues => 1,
            SlotKind::Histogram => 2,
            SlotKind::Correlation => 3,
            SlotKind::MostCommonElements => 4,
            SlotKind::DistinctElementsHistogram => 5,
            SlotKind::RangeLengthHistogram => 6,
            SlotKind::BoundsHistogram => 7,
            SlotKind::Sketch(SketchVariant::Summary) => 98,
            SlotKind::Sketch(SketchVariant::Full) => 99,
            SlotKind::Other(code) => code,
        }
    }

    pub fn treatment(self) -> SlotTreatment {
        match self {
            SlotKind::Sketch(variant) => SlotTreatment::Sketch(variant),
            _ => SlotTreatment::Default,
        }
    }
}

/// Homogeneous scalar sequence fed to the array literal encoder. Numeric
/// elements hold their plain text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarArray {
    Numeric(Vec<String>),
    Text(Vec<String>),
}

impl ScalarArray {
    pub fn len(&self) -> usize {
        match self {
            ScalarArray::Numeric(v) | ScalarArray::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn from_numbers(numbers: &[f32]) -> Self {
        ScalarArray::Numeric(numbers.iter().map(|n| n.to_string()).collect())
    }

    /// Bind an `array_to_json` rendering. All-number arrays stay numeric;
    /// anything else becomes text. JSON attributes keep each element as JSON.
    pub fn from_json(value: &Value, json_elements: bool) -> Result<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| Error::Catalog(format!("expected a JSON array, got {}", value)))?;

        if json_elements {
            return Ok(ScalarArray::Text(
                items.iter().map(|item| item.to_string()).collect(),
            ));
        }
        if items.iter().all(Value::is_number) {
            return Ok(ScalarArray::Numeric(
                items.iter().map(|item| item.to_string()).collect(),
            ));
        }
        items
            .iter()
            .map(element_text)
            .collect::<Result<Vec<_>>>()
            .map(ScalarArray::Text)
    }
}

fn element_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => {
            // Nested arrays go back to the server's array text form
            let inner = items
                .iter()
                .map(|item| match item {
                    Value::Array(_) | Value::Number(_) | Value::Bool(_) => element_text(item),
                    _ => element_text(item).map(|s| {
                        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("{{{}}}", inner.join(",")))
        }
        Value::Object(_) => Ok(value.to_string()),
        Value::Null => Err(Error::Catalog("NULL element in statistics values".into())),
    }
}

/// Decode a `bytea` value in hex output form (`\x0a0b...`).
pub fn decode_bytea_hex(text: &str) -> Result<Vec<u8>> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| Error::Catalog(format!("sketch payload is not hex bytea: {:.16}", text)))?;
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(Error::Catalog("malformed hex bytea".into()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| Error::Catalog(format!("invalid hex byte: {}", &hex[i..i + 2])))
        })
        .collect()
}

/// Payload of a slot's `values` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotValues {
    Array(ScalarArray),
    /// Raw sketch counters, one byte string per array element.
    Sketch(Vec<Vec<u8>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsSlot {
    pub kind: Option<i16>,
    pub operator: Option<u32>,
    pub collation: Option<u32>,
    pub numbers: Option<Vec<f32>>,
    pub values: Option<SlotValues>,
}

impl StatisticsSlot {
    pub fn empty() -> Self {
        Self {
            kind: Some(0),
            operator: Some(0),
            collation: Some(0),
            numbers: None,
            values: None,
        }
    }

    pub fn slot_kind(&self) -> SlotKind {
        SlotKind::from_code(self.kind.unwrap_or(0))
    }
}

/// One column's planner statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsRow {
    pub relation: RelationName,
    pub attribute_number: i16,
    pub attribute_name: String,
    pub attribute_type: AttributeType,
    pub inherited: Option<bool>,
    pub null_fraction: Option<f32>,
    pub average_width: Option<i32>,
    pub distinct_estimate: Option<f32>,
    pub slots: [StatisticsSlot; STATISTICS_SLOTS],
}

/// A multivariate statistics object and its built payloads, each in the
/// text output form of its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedStatisticsObject {
    pub relation: RelationName,
    pub name: String,
    pub definition: String,
    pub ndistinct: Option<String>,
    pub dependencies: Option<String>,
    pub mcv: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableCardinality {
    pub relation: RelationName,
    pub page_count: i32,
    pub row_estimate: f32,
    pub visible_page_count: i32,
}

/// Everything a query touches, as reported by the dependency-discovery
/// function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueryDependencies {
    #[serde(rename = "relids", default, deserialize_with = "id_list")]
    pub relation_ids: Vec<u32>,
    #[serde(rename = "funcids", default, deserialize_with = "id_list")]
    pub function_ids: Vec<u32>,
    #[serde(rename = "relnames", default, deserialize_with = "name_list")]
    pub relation_names: Option<Vec<String>>,
}

impl QueryDependencies {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Dependency(format!("unreadable dependency set: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        self.relation_ids.is_empty() && self.function_ids.is_empty()
    }
}

// Lists arrive either as JSON arrays or as the comma-joined strings older
// servers return.
fn list_items(value: Value) -> std::result::Result<Vec<Value>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::String(joined) => Ok(joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect()),
        other => Err(format!("expected a list, got {}", other)),
    }
}

fn id_list<'de, D>(deserializer: D) -> std::result::Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = list_items(Value::deserialize(deserializer)?).map_err(serde::de::Error::custom)?;
    items
        .iter()
        .map(|item| {
            let id = match item {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            };
            id.and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| serde::de::Error::custom(format!("invalid object id: {}", item)))
        })
        .collect()
}

fn name_list<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    let items = list_items(value).map_err(serde::de::Error::custom)?;
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(serde::de::Error::custom(format!("invalid relation name: {}", other))),
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub database: String,
    pub server_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerSetting {
    pub name: String,
    pub setting: String,
}

/// Receives streamed records one at a time.
pub type Sink<'a, T> = &'a mut (dyn FnMut(T) -> Result<()> + Send);

/// Read-only access to the source catalogs.
#[async_trait]
pub trait CatalogSource: Send {
    async fn source_identity(&mut self) -> Result<SourceIdentity>;

    async fn dependencies(&mut self, query: &str) -> Result<QueryDependencies>;

    /// Distinct namespaces of the given relations.
    async fn namespaces(&mut self, relation_ids: &[u32]) -> Result<Vec<String>>;

    async fn cardinalities(
        &mut self,
        relation_ids: &[u32],
        sink: Sink<'_, TableCardinality>,
    ) -> Result<u64>;

    async fn statistics(
        &mut self,
        relation_ids: &[u32],
        sink: Sink<'_, StatisticsRow>,
    ) -> Result<u64>;

    async fn extended_statistics(
        &mut self,
        relation_ids: &[u32],
        sink: Sink<'_, ExtendedStatisticsObject>,
    ) -> Result<u64>;

    async fn planner_settings(&mut self) -> Result<Vec<PlannerSetting>>;
}
