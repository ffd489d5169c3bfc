//! `tokio-postgres` backed catalog reader.
//!
//! Wide result sets are pulled through a portal `batch_size` rows at a time
//! inside one read-only transaction, so only a single batch is ever resident.

use super::{
    decode_bytea_hex, AttributeType, CatalogSource, ExtendedStatisticsObject, PlannerSetting,
    QueryDependencies, RelationName, ScalarArray, Sink, SlotTreatment, SlotValues, SourceIdentity,
    StatisticsRow, StatisticsSlot, TableCardinality, STATISTICS_SLOTS,
};
use crate::config::ReproConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

const IDENTITY_QUERY: &str = "SELECT pg_catalog.current_database(), pg_catalog.version()";

const NAMESPACES_QUERY: &str = "\
SELECT DISTINCT n.nspname
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.oid = ANY($1)
ORDER BY n.nspname";

const CARDINALITY_QUERY: &str = "\
SELECT c.relname, n.nspname, c.relpages, c.reltuples, c.relallvisible
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.oid = ANY($1) AND n.nspname NOT LIKE 'pg_temp_%'
ORDER BY n.nspname, c.relname";

const STATISTICS_QUERY: &str = "\
SELECT c.relname, n.nspname, a.attname,
       tn.nspname AS type_schema,
       pg_catalog.format_type(a.atttypid, NULL) AS type_name,
       s.staattnum, s.stainherit, s.stanullfrac, s.stawidth, s.stadistinct,
       s.stakind1, s.stakind2, s.stakind3, s.stakind4, s.stakind5,
       s.staop1, s.staop2, s.staop3, s.staop4, s.staop5,
       s.stacoll1, s.stacoll2, s.stacoll3, s.stacoll4, s.stacoll5,
       s.stanumbers1, s.stanumbers2, s.stanumbers3, s.stanumbers4, s.stanumbers5,
       pg_catalog.array_to_json(s.stavalues1)::text AS stavalues1,
       pg_catalog.array_to_json(s.stavalues2)::text AS stavalues2,
       pg_catalog.array_to_json(s.stavalues3)::text AS stavalues3,
       pg_catalog.array_to_json(s.stavalues4)::text AS stavalues4,
       pg_catalog.array_to_json(s.stavalues5)::text AS stavalues5
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_statistic s ON s.starelid = c.oid
JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = s.staattnum
JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
JOIN pg_catalog.pg_namespace tn ON tn.oid = t.typnamespace
WHERE c.oid = ANY($1) AND n.nspname NOT LIKE 'pg_temp_%'
ORDER BY n.nspname, c.relname, s.staattnum, s.stainherit";

const EXTENDED_STATISTICS_QUERY: &str = "\
SELECT n.nspname, c.relname, s.stxname,
       pg_catalog.pg_get_statisticsobjdef(s.oid) AS definition,
       d.stxdndistinct::text AS ndistinct,
       d.stxddependencies::text AS dependencies,
       d.stxdmcv::text AS mcv
FROM pg_catalog.pg_statistic_ext s
JOIN pg_catalog.pg_class c ON c.oid = s.stxrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_catalog.pg_statistic_ext_data d ON d.stxoid = s.oid
WHERE s.stxrelid = ANY($1) AND n.nspname NOT LIKE 'pg_temp_%'
ORDER BY n.nspname, c.relname, s.stxname";

// Catalog renderers (format_type, pg_get_statisticsobjdef) omit the schema
// of anything visible on the search path; an empty path qualifies every name.
const QUALIFY_NAMES: &str = "SET LOCAL search_path = ''";

/// A streamed catalog query and the statement run before it in the same
/// transaction.
struct CatalogQuery {
    sql: &'static str,
    setup: Option<&'static str>,
}

const CARDINALITY: CatalogQuery = CatalogQuery {
    sql: CARDINALITY_QUERY,
    setup: None,
};

const STATISTICS: CatalogQuery = CatalogQuery {
    sql: STATISTICS_QUERY,
    setup: Some(QUALIFY_NAMES),
};

const EXTENDED_STATISTICS: CatalogQuery = CatalogQuery {
    sql: EXTENDED_STATISTICS_QUERY,
    setup: Some(QUALIFY_NAMES),
};

const PLANNER_SETTINGS_QUERY: &str = "\
SELECT name, setting
FROM pg_catalog.pg_settings
WHERE source NOT IN ('default', 'override') AND category LIKE 'Query Tuning%'
ORDER BY name";

pub struct PgCatalog {
    client: Client,
    batch_size: usize,
    dependency_function: String,
}

impl PgCatalog {
    pub async fn connect(config: &ReproConfig) -> Result<Self> {
        let (client, connection) =
            tokio_postgres::connect(&config.connection_string(), NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("catalog connection closed: {}", e);
            }
        });
        info!(dbname = %config.dbname, "connected to source database");
        Ok(Self::new(client, config))
    }

    pub fn new(client: Client, config: &ReproConfig) -> Self {
        Self {
            client,
            batch_size: config.batch_size,
            dependency_function: config.dependency_function.clone(),
        }
    }

    /// Run `query` through a portal and hand each row to `bind`.
    async fn stream<F>(
        &mut self,
        query: &CatalogQuery,
        params: &[&(dyn ToSql + Sync)],
        mut bind: F,
    ) -> Result<u64>
    where
        F: FnMut(&Row) -> Result<()> + Send,
    {
        let batch_size = self.batch_size;
        let max_rows = fetch_size(batch_size)?;
        let tx = self
            .client
            .build_transaction()
            .read_only(true)
            .start()
            .await?;
        if let Some(setup) = query.setup {
            tx.batch_execute(setup).await?;
        }

        let portal = tx.bind(query.sql, params).await?;
        let mut total = 0u64;
        loop {
            let rows = tx.query_portal(&portal, max_rows).await?;
            debug!(rows = rows.len(), "fetched catalog batch");
            for row in &rows {
                bind(row)?;
            }
            total += rows.len() as u64;
            if rows.len() < batch_size {
                break;
            }
        }
        tx.commit().await?;
        Ok(total)
    }
}

#[async_trait]
impl CatalogSource for PgCatalog {
    async fn source_identity(&mut self) -> Result<SourceIdentity> {
        let row = self.client.query_one(IDENTITY_QUERY, &[]).await?;
        Ok(SourceIdentity {
            database: row.try_get(0)?,
            server_version: row.try_get(1)?,
        })
    }

    async fn dependencies(&mut self, query: &str) -> Result<QueryDependencies> {
        // Discovery plans the query; keep it off parallel workers
        self.client
            .batch_execute("SET max_parallel_workers_per_gather = 0")
            .await?;
        let sql = format!("SELECT {}($1)::text", self.dependency_function);
        let row = self.client.query_one(sql.as_str(), &[&query]).await?;
        let text: Option<String> = row.try_get(0)?;
        let text = text.ok_or_else(|| {
            Error::Dependency(format!("{} returned NULL", self.dependency_function))
        })?;
        let deps = QueryDependencies::parse(&text)?;
        info!(
            relations = deps.relation_ids.len(),
            functions = deps.function_ids.len(),
            "resolved query dependencies"
        );
        Ok(deps)
    }

    async fn namespaces(&mut self, relation_ids: &[u32]) -> Result<Vec<String>> {
        let ids = relation_ids.to_vec();
        let rows = self.client.query(NAMESPACES_QUERY, &[&ids]).await?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(Error::from))
            .collect()
    }

    async fn cardinalities(
        &mut self,
        relation_ids: &[u32],
        sink: Sink<'_, TableCardinality>,
    ) -> Result<u64> {
        let ids = relation_ids.to_vec();
        self.stream(&CARDINALITY, &[&ids], |row| {
            sink(TableCardinality {
                relation: RelationName::new(
                    row.try_get::<_, String>("nspname")?,
                    row.try_get::<_, String>("relname")?,
                ),
                page_count: row.try_get("relpages")?,
                row_estimate: row.try_get("reltuples")?,
                visible_page_count: row.try_get("relallvisible")?,
            })
        })
        .await
    }

    async fn statistics(
        &mut self,
        relation_ids: &[u32],
        sink: Sink<'_, StatisticsRow>,
    ) -> Result<u64> {
        let ids = relation_ids.to_vec();
        self.stream(&STATISTICS, &[&ids], |row| {
            sink(bind_statistics_row(row)?)
        })
        .await
    }

    async fn extended_statistics(
        &mut self,
        relation_ids: &[u32],
        sink: Sink<'_, ExtendedStatisticsObject>,
    ) -> Result<u64> {
        let ids = relation_ids.to_vec();
        self.stream(&EXTENDED_STATISTICS, &[&ids], |row| {
            sink(ExtendedStatisticsObject {
                relation: RelationName::new(
                    row.try_get::<_, String>("nspname")?,
                    row.try_get::<_, String>("relname")?,
                ),
                name: row.try_get("stxname")?,
                definition: row.try_get("definition")?,
                ndistinct: row.try_get("ndistinct")?,
                dependencies: row.try_get("dependencies")?,
                mcv: row.try_get("mcv")?,
            })
        })
        .await
    }

    async fn planner_settings(&mut self) -> Result<Vec<PlannerSetting>> {
        let rows = self.client.query(PLANNER_SETTINGS_QUERY, &[]).await?;
        rows.iter()
            .map(|row| {
                Ok(PlannerSetting {
                    name: row.try_get("name")?,
                    setting: row.try_get("setting")?,
                })
            })
            .collect()
    }
}

// A portal fetch of zero or fewer rows means "all remaining rows".
fn fetch_size(batch_size: usize) -> Result<i32> {
    match i32::try_from(batch_size) {
        Ok(rows) if rows > 0 => Ok(rows),
        _ => Err(Error::Config(format!(
            "batch_size must be between 1 and {}, got {}",
            i32::MAX,
            batch_size
        ))),
    }
}

fn bind_statistics_row(row: &Row) -> Result<StatisticsRow> {
    let attribute_type = AttributeType::new(
        row.try_get::<_, String>("type_schema")?,
        row.try_get::<_, String>("type_name")?,
    );

    let mut slots: [StatisticsSlot; STATISTICS_SLOTS] =
        std::array::from_fn(|_| StatisticsSlot::empty());
    for (i, slot) in slots.iter_mut().enumerate() {
        let n = i + 1;
        slot.kind = row.try_get(format!("stakind{}", n).as_str())?;
        slot.operator = row.try_get(format!("staop{}", n).as_str())?;
        slot.collation = row.try_get(format!("stacoll{}", n).as_str())?;
        slot.numbers = row.try_get(format!("stanumbers{}", n).as_str())?;
        let values: Option<String> = row.try_get(format!("stavalues{}", n).as_str())?;
        slot.values = match values {
            Some(json) => Some(bind_slot_values(
                &json,
                slot.slot_kind().treatment(),
                &attribute_type,
            )?),
            None => None,
        };
    }

    Ok(StatisticsRow {
        relation: RelationName::new(
            row.try_get::<_, String>("nspname")?,
            row.try_get::<_, String>("relname")?,
        ),
        attribute_number: row.try_get("staattnum")?,
        attribute_name: row.try_get("attname")?,
        attribute_type,
        inherited: row.try_get("stainherit")?,
        null_fraction: row.try_get("stanullfrac")?,
        average_width: row.try_get("stawidth")?,
        distinct_estimate: row.try_get("stadistinct")?,
        slots,
    })
}

/// Bind a slot's `array_to_json` text. Sketch slots hold `bytea[]`, which
/// renders as hex strings.
pub(crate) fn bind_slot_values(
    json: &str,
    treatment: SlotTreatment,
    attribute_type: &AttributeType,
) -> Result<SlotValues> {
    let value: Value = serde_json::from_str(json)?;
    match treatment {
        SlotTreatment::Sketch(_) => {
            let items = value
                .as_array()
                .ok_or_else(|| Error::Catalog("sketch payload is not an array".into()))?;
            items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| Error::Catalog("sketch element is not bytea".into()))
                        .and_then(decode_bytea_hex)
                })
                .collect::<Result<Vec<_>>>()
                .map(SlotValues::Sketch)
        }
        SlotTreatment::Default => {
            ScalarArray::from_json(&value, attribute_type.is_json()).map(SlotValues::Array)
        }
    }
}
