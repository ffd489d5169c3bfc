//! Builds portable "repro" scripts: the DDL skeleton and planner statistics a
//! query depends on, without any of the data, so the optimizer produces the
//! same plan on an empty instance.

pub mod assembler;
pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod encode;
pub mod error;
pub mod logging;
pub mod repro;

pub use assembler::{ReproSummary, ReproWriter, Section};
pub use catalog::{CatalogSource, PgCatalog};
pub use collaborators::{DdlExtractor, DdlRequest, PgDump, PlanTracer, PsqlExplain};
pub use config::{DdlMode, ReproConfig};
pub use error::{Error, Result};
pub use repro::{generate, ReproRequest};
