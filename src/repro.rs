//! End-to-end generation of a repro script.
//!
//! Steps run strictly in order and the first failure aborts the run; a
//! partially written script is never valid output.

use crate::assembler::{ReproSummary, ReproWriter, ScriptHeader};
use crate::catalog::{
    CatalogSource, ExtendedStatisticsObject, StatisticsRow, TableCardinality,
};
use crate::collaborators::{DdlExtractor, DdlRequest, PlanTracer};
use crate::config::ReproConfig;
use crate::encode::statistics::StatisticsEncoder;
use crate::Result;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ReproRequest {
    pub query: String,
    pub command_line: String,
}

/// Per-run staging directory under the configured staging root.
pub fn run_staging_dir(config: &ReproConfig, started: DateTime<Utc>) -> PathBuf {
    config
        .staging_dir
        .join(started.format("%Y%m%d%H%M%S%3f").to_string())
}

pub async fn generate<W: Write + Send>(
    config: &ReproConfig,
    catalog: &mut dyn CatalogSource,
    ddl_extractor: &dyn DdlExtractor,
    plan_tracer: Option<&dyn PlanTracer>,
    request: &ReproRequest,
    out: W,
) -> Result<(W, ReproSummary)> {
    let identity = catalog.source_identity().await?;
    info!(database = %identity.database, "generating repro");

    let deps = catalog.dependencies(&request.query).await?;
    let relation_ids = deps.relation_ids.clone();

    let namespaces: Vec<String> = catalog
        .namespaces(&relation_ids)
        .await?
        .into_iter()
        .filter(|ns| !config.is_default_namespace(ns) && !ns.starts_with("pg_temp_"))
        .collect();

    let ddl = ddl_extractor
        .extract(&DdlRequest::from_dependencies(config.ddl_mode, &deps)?)
        .await?;

    let mut writer = ReproWriter::new(out);
    writer.write_header(&ScriptHeader {
        identity,
        generated_at: Utc::now(),
        command_line: request.command_line.clone(),
    })?;
    for namespace in &namespaces {
        writer.write_namespace(namespace)?;
    }
    writer.write_ddl(&ddl)?;
    writer.write_allow_system_mutation()?;

    let count = catalog
        .cardinalities(&relation_ids, &mut |table: TableCardinality| {
            writer.write_cardinality(&table)
        })
        .await?;
    info!(relations = count, "wrote table cardinalities");

    let encoder = StatisticsEncoder::from_config(config);
    let count = catalog
        .statistics(&relation_ids, &mut |row: StatisticsRow| {
            writer.write_statistics(&encoder, &row)
        })
        .await?;
    info!(
        rows = count,
        include_sketches = config.include_sketches,
        "wrote column statistics"
    );

    let count = catalog
        .extended_statistics(&relation_ids, &mut |object: ExtendedStatisticsObject| {
            writer.write_extended_statistics(&object)
        })
        .await?;
    info!(objects = count, "wrote extended statistics");

    writer.write_query_text(&request.query)?;
    let settings = catalog.planner_settings().await?;
    writer.write_planner_settings(&settings)?;

    if let Some(tracer) = plan_tracer {
        let trace = tracer.trace(&request.query).await?;
        writer.write_plan_trace(&trace)?;
    }

    let (out, summary) = writer.finish()?;
    info!(?summary, "repro complete");
    Ok((out, summary))
}
