#![allow(dead_code)]

use async_trait::async_trait;
use minirepro::catalog::{
    AttributeType, CatalogSource, ExtendedStatisticsObject, PlannerSetting, QueryDependencies,
    RelationName, ScalarArray, Sink, SlotValues, SourceIdentity, StatisticsRow, StatisticsSlot,
    TableCardinality, STATISTICS_SLOTS,
};
use minirepro::collaborators::{DdlExtractor, DdlRequest, PlanTracer};
use minirepro::{Error, Result};
use std::sync::Mutex;

/// In-memory catalog. `fail_statistics_after` simulates a query failure
/// part-way through the statistics pass.
pub struct FakeCatalog {
    pub dependencies: QueryDependencies,
    pub namespaces: Vec<String>,
    pub cardinalities: Vec<TableCardinality>,
    pub statistics: Vec<StatisticsRow>,
    pub extended: Vec<ExtendedStatisticsObject>,
    pub settings: Vec<PlannerSetting>,
    pub fail_statistics_after: Option<usize>,
    pub seen_queries: Vec<String>,
}

impl FakeCatalog {
    pub fn orders() -> Self {
        Self {
            dependencies: QueryDependencies {
                relation_ids: vec![16384, 16390],
                function_ids: vec![16400],
                relation_names: Some(vec![
                    "public.orders".to_string(),
                    "sales.regions".to_string(),
                ]),
            },
            namespaces: vec!["public".to_string(), "sales".to_string()],
            cardinalities: vec![
                TableCardinality {
                    relation: RelationName::new("public", "orders"),
                    page_count: 120,
                    row_estimate: 15000.0,
                    visible_page_count: 118,
                },
                TableCardinality {
                    relation: RelationName::new("sales", "regions"),
                    page_count: 1,
                    row_estimate: 12.0,
                    visible_page_count: 1,
                },
            ],
            statistics: vec![orders_customer_row(), sketch_row()],
            extended: vec![ExtendedStatisticsObject {
                relation: RelationName::new("public", "orders"),
                name: "orders_stx".to_string(),
                definition: "CREATE STATISTICS public.orders_stx (ndistinct) ON customer_id, region_id FROM public.orders".to_string(),
                ndistinct: Some(r#"{"2, 3": 480}"#.to_string()),
                dependencies: None,
                mcv: None,
            }],
            settings: vec![PlannerSetting {
                name: "enable_nestloop".to_string(),
                setting: "off".to_string(),
            }],
            fail_statistics_after: None,
            seen_queries: Vec::new(),
        }
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn source_identity(&mut self) -> Result<SourceIdentity> {
        Ok(SourceIdentity {
            database: "sales_db".to_string(),
            server_version: "PostgreSQL 12.12 (Greenplum Database 7.1.0)".to_string(),
        })
    }

    async fn dependencies(&mut self, query: &str) -> Result<QueryDependencies> {
        self.seen_queries.push(query.to_string());
        Ok(self.dependencies.clone())
    }

    async fn namespaces(&mut self, _relation_ids: &[u32]) -> Result<Vec<String>> {
        Ok(self.namespaces.clone())
    }

    async fn cardinalities(
        &mut self,
        _relation_ids: &[u32],
        sink: Sink<'_, TableCardinality>,
    ) -> Result<u64> {
        for table in self.cardinalities.clone() {
            sink(table)?;
        }
        Ok(self.cardinalities.len() as u64)
    }

    async fn statistics(
        &mut self,
        _relation_ids: &[u32],
        sink: Sink<'_, StatisticsRow>,
    ) -> Result<u64> {
        for (i, row) in self.statistics.clone().into_iter().enumerate() {
            if self.fail_statistics_after == Some(i) {
                return Err(Error::Catalog("connection lost".to_string()));
            }
            sink(row)?;
        }
        Ok(self.statistics.len() as u64)
    }

    async fn extended_statistics(
        &mut self,
        _relation_ids: &[u32],
        sink: Sink<'_, ExtendedStatisticsObject>,
    ) -> Result<u64> {
        for object in self.extended.clone() {
            sink(object)?;
        }
        Ok(self.extended.len() as u64)
    }

    async fn planner_settings(&mut self) -> Result<Vec<PlannerSetting>> {
        Ok(self.settings.clone())
    }
}

pub struct FakeDdl {
    pub ddl: Result<Vec<u8>>,
    pub requests: Mutex<Vec<DdlRequest>>,
}

impl FakeDdl {
    pub fn ok(ddl: &str) -> Self {
        Self {
            ddl: Ok(ddl.as_bytes().to_vec()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            ddl: Err(Error::Collaborator {
                program: "pg_dump".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "pg_dump: error: connection refused".to_string(),
            }),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DdlExtractor for FakeDdl {
    async fn extract(&self, request: &DdlRequest) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.ddl {
            Ok(ddl) => Ok(ddl.clone()),
            Err(Error::Collaborator {
                program,
                status,
                stderr,
            }) => Err(Error::Collaborator {
                program: program.clone(),
                status: status.clone(),
                stderr: stderr.clone(),
            }),
            Err(e) => Err(Error::Catalog(e.to_string())),
        }
    }
}

pub struct FakeTracer(pub &'static str);

#[async_trait]
impl PlanTracer for FakeTracer {
    async fn trace(&self, _query: &str) -> Result<Vec<u8>> {
        Ok(self.0.as_bytes().to_vec())
    }
}

pub fn empty_slots() -> [StatisticsSlot; STATISTICS_SLOTS] {
    std::array::from_fn(|_| StatisticsSlot::empty())
}

/// `orders.customer_id`: integer, 500 distinct, MCV {1,2}.
pub fn orders_customer_row() -> StatisticsRow {
    let mut slots = empty_slots();
    slots[0] = StatisticsSlot {
        kind: Some(1),
        operator: Some(96),
        collation: Some(0),
        numbers: Some(vec![0.1, 0.05]),
        values: Some(SlotValues::Array(ScalarArray::Numeric(vec![
            "1".to_string(),
            "2".to_string(),
        ]))),
    };
    StatisticsRow {
        relation: RelationName::new("public", "orders"),
        attribute_number: 2,
        attribute_name: "customer_id".to_string(),
        attribute_type: AttributeType::new("pg_catalog", "integer"),
        inherited: Some(false),
        null_fraction: Some(0.0),
        average_width: Some(4),
        distinct_estimate: Some(500.0),
        slots,
    }
}

/// `regions.name` carrying a full sketch in slot 2.
pub fn sketch_row() -> StatisticsRow {
    let mut slots = empty_slots();
    slots[0] = StatisticsSlot {
        kind: Some(2),
        operator: Some(664),
        collation: Some(100),
        numbers: None,
        values: Some(SlotValues::Array(ScalarArray::Text(vec![
            "east".to_string(),
            "west".to_string(),
        ]))),
    };
    slots[1] = StatisticsSlot {
        kind: Some(99),
        operator: Some(0),
        collation: Some(0),
        numbers: Some(vec![12.0]),
        values: Some(SlotValues::Sketch(vec![b"secret-east".to_vec()])),
    };
    StatisticsRow {
        relation: RelationName::new("sales", "regions"),
        attribute_number: 1,
        attribute_name: "name".to_string(),
        attribute_type: AttributeType::new("pg_catalog", "text"),
        inherited: Some(false),
        null_fraction: Some(0.0),
        average_width: Some(5),
        distinct_estimate: Some(-1.0),
        slots,
    }
}

/// Undo the outer `E'...'` constant: strip the prefix and quotes, collapse
/// doubled quotes and resolve backslash escapes.
pub fn decode_string_constant(literal: &str) -> String {
    let body = literal
        .strip_prefix("E'")
        .or_else(|| literal.strip_prefix('\''))
        .and_then(|rest| rest.strip_suffix('\''))
        .expect("not a string constant");
    let escaped = literal.starts_with("E'");

    let mut out = String::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if escaped => out.push(chars.next().expect("dangling backslash")),
            '\'' => {
                assert_eq!(chars.next(), Some('\''), "unpaired quote");
                out.push('\'');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Parse a one-dimensional array value in the server's text syntax.
pub fn decode_array_text(text: &str) -> Vec<String> {
    let body = text
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .expect("not an array");
    if body.is_empty() {
        return Vec::new();
    }

    let mut items = Vec::new();
    let mut chars = body.chars().peekable();
    loop {
        let mut item = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next().expect("unterminated element") {
                    '\\' => item.push(chars.next().expect("dangling backslash")),
                    '"' => break,
                    c => item.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                item.push(c);
                chars.next();
            }
        }
        items.push(item);
        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(c) => panic!("unexpected {:?} after element", c),
        }
    }
    items
}

/// Decode one `bytea` escape-format value (`\ooo` octets, `\\`, literal bytes).
pub fn decode_bytea_escape(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes.get(i + 1) == Some(&b'\\') {
                out.push(b'\\');
                i += 2;
            } else {
                let octal = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap();
                out.push(u8::from_str_radix(octal, 8).unwrap());
                i += 4;
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

fn single_slot_row(
    relation: RelationName,
    attribute_name: &str,
    attribute_type: AttributeType,
    values: ScalarArray,
) -> StatisticsRow {
    let mut slots = empty_slots();
    slots[0] = StatisticsSlot {
        kind: Some(1),
        operator: Some(3516),
        collation: Some(0),
        numbers: Some(vec![0.6, 0.4]),
        values: Some(SlotValues::Array(values)),
    };
    StatisticsRow {
        relation,
        attribute_number: 3,
        attribute_name: attribute_name.to_string(),
        attribute_type,
        inherited: Some(false),
        null_fraction: Some(0.0),
        average_width: Some(4),
        distinct_estimate: Some(2.0),
        slots,
    }
}

/// `orders.mood`: a column of the enum type `sales.mood`.
pub fn enum_row() -> StatisticsRow {
    single_slot_row(
        RelationName::new("public", "orders"),
        "mood",
        AttributeType::new("sales", "sales.mood"),
        ScalarArray::Text(vec!["happy".to_string(), "sad".to_string()]),
    )
}

/// `orders.tags`: an `integer[]` column whose MCV entries are arrays.
pub fn int_array_row() -> StatisticsRow {
    single_slot_row(
        RelationName::new("public", "orders"),
        "tags",
        AttributeType::new("pg_catalog", "integer[]"),
        ScalarArray::Text(vec!["{0,1}".to_string(), "{0,2}".to_string()]),
    )
}
