//! Output assembler. Writes the repro script section by section and refuses
//! to go back to an earlier section, since replay relies on the DDL being in
//! place before any statistics are applied.

use crate::catalog::{ExtendedStatisticsObject, PlannerSetting, SourceIdentity, StatisticsRow, TableCardinality};
use crate::encode::statistics::StatisticsEncoder;
use crate::encode::{comment_lines, encode_cardinality, encode_extended_statistics, quote_ident};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::io::Write;

pub const TOOL_NAME: &str = "minirepro";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Start,
    Header,
    Namespaces,
    Ddl,
    AllowSystemMutation,
    Cardinality,
    Statistics,
    ExtendedStatistics,
    QueryText,
    PlannerSettings,
    PlanTrace,
}

/// Header block contents.
#[derive(Debug, Clone)]
pub struct ScriptHeader {
    pub identity: SourceIdentity,
    pub generated_at: DateTime<Utc>,
    pub command_line: String,
}

/// Counters reported once the script is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReproSummary {
    pub namespaces: usize,
    pub ddl_bytes: usize,
    pub cardinalities: u64,
    pub statistics_rows: u64,
    pub extended_statistics: u64,
    pub planner_settings: usize,
    pub plan_trace: bool,
}

pub struct ReproWriter<W: Write> {
    out: W,
    section: Section,
    summary: ReproSummary,
}

impl<W: Write> ReproWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            section: Section::Start,
            summary: ReproSummary::default(),
        }
    }

    pub fn section(&self) -> Section {
        self.section
    }

    fn enter(&mut self, section: Section) -> Result<()> {
        if section < self.section {
            return Err(Error::Assembly(format!(
                "{:?} cannot follow {:?}",
                section, self.section
            )));
        }
        if section > self.section {
            self.section = section;
        }
        Ok(())
    }

    pub fn write_header(&mut self, header: &ScriptHeader) -> Result<()> {
        self.enter(Section::Header)?;
        writeln!(
            self.out,
            "-- {} {} (commit {}, built {})",
            TOOL_NAME,
            env!("CARGO_PKG_VERSION"),
            env!("GIT_COMMIT"),
            env!("BUILD_TIME")
        )?;
        writeln!(self.out, "-- Database: {}", header.identity.database)?;
        writeln!(self.out, "-- Date: {}", header.generated_at.to_rfc3339())?;
        writeln!(
            self.out,
            "-- Command Line: {}",
            header.command_line.replace('\n', " ")
        )?;
        writeln!(
            self.out,
            "-- Version: {}",
            header.identity.server_version.replace('\n', " ")
        )?;
        writeln!(self.out)?;
        Ok(())
    }

    pub fn write_namespace(&mut self, namespace: &str) -> Result<()> {
        self.enter(Section::Namespaces)?;
        writeln!(self.out, "CREATE SCHEMA IF NOT EXISTS {};", quote_ident(namespace))?;
        self.summary.namespaces += 1;
        Ok(())
    }

    /// Imported definitions, verbatim.
    pub fn write_ddl(&mut self, ddl: &[u8]) -> Result<()> {
        self.enter(Section::Ddl)?;
        writeln!(self.out)?;
        self.out.write_all(ddl)?;
        if !ddl.is_empty() && !ddl.ends_with(b"\n") {
            writeln!(self.out)?;
        }
        self.summary.ddl_bytes += ddl.len();
        Ok(())
    }

    pub fn write_allow_system_mutation(&mut self) -> Result<()> {
        self.enter(Section::AllowSystemMutation)?;
        writeln!(self.out)?;
        writeln!(self.out, "-- Allow writes to catalog tables")?;
        writeln!(self.out, "SET allow_system_table_mods = true;")?;
        writeln!(self.out)?;
        Ok(())
    }

    pub fn write_cardinality(&mut self, table: &TableCardinality) -> Result<()> {
        self.enter(Section::Cardinality)?;
        writeln!(self.out, "-- Table: {}", table.relation)?;
        writeln!(self.out, "{}", encode_cardinality(table))?;
        writeln!(self.out)?;
        self.summary.cardinalities += 1;
        Ok(())
    }

    pub fn write_statistics(
        &mut self,
        encoder: &StatisticsEncoder<'_>,
        row: &StatisticsRow,
    ) -> Result<()> {
        self.enter(Section::Statistics)?;
        writeln!(self.out, "{}", encoder.encode(row))?;
        self.summary.statistics_rows += 1;
        Ok(())
    }

    pub fn write_extended_statistics(&mut self, object: &ExtendedStatisticsObject) -> Result<()> {
        self.enter(Section::ExtendedStatistics)?;
        writeln!(self.out, "{}", encode_extended_statistics(object))?;
        self.summary.extended_statistics += 1;
        Ok(())
    }

    pub fn write_query_text(&mut self, query: &str) -> Result<()> {
        self.enter(Section::QueryText)?;
        writeln!(self.out, "-- Query text")?;
        writeln!(self.out, "--")?;
        writeln!(self.out, "{}", comment_lines(query.trim_end()))?;
        writeln!(self.out)?;
        Ok(())
    }

    /// Recorded for the reader; never executed on replay.
    pub fn write_planner_settings(&mut self, settings: &[PlannerSetting]) -> Result<()> {
        self.enter(Section::PlannerSettings)?;
        writeln!(self.out, "-- Non-default planner settings")?;
        writeln!(self.out, "--")?;
        for setting in settings {
            writeln!(
                self.out,
                "-- SET {} = '{}';",
                setting.name,
                setting.setting.replace('\'', "''")
            )?;
        }
        writeln!(self.out)?;
        self.summary.planner_settings = settings.len();
        Ok(())
    }

    pub fn write_plan_trace(&mut self, trace: &[u8]) -> Result<()> {
        self.enter(Section::PlanTrace)?;
        writeln!(self.out, "-- Plan trace")?;
        writeln!(self.out, "--")?;
        writeln!(
            self.out,
            "{}",
            comment_lines(String::from_utf8_lossy(trace).trim_end())
        )?;
        self.summary.plan_trace = true;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(W, ReproSummary)> {
        self.out.flush()?;
        Ok((self.out, self.summary))
    }
}
