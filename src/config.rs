//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then the
//! libpq environment variables, then whatever the command line overrides.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How the DDL-extraction collaborator is told which objects to dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DdlMode {
    /// Relation and function identifiers from dependency discovery.
    #[default]
    Oids,
    /// Qualified relation names only; functions are not dumped.
    Names,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReproConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub dbname: String,

    /// Emit real cardinality-sketch payloads instead of redacting them
    pub include_sketches: bool,
    pub plan_trace: bool,
    pub ddl_mode: DdlMode,

    /// Rows fetched per portal round trip
    pub batch_size: usize,
    pub dependency_function: String,
    pub pg_dump_path: PathBuf,
    pub psql_path: PathBuf,
    pub staging_dir: PathBuf,

    /// Namespaces whose statistics may already hold default rows on a fresh
    /// instance; their deletes are emitted live.
    pub system_namespaces: Vec<String>,
    /// Namespaces that exist on every instance and are never created.
    pub default_namespaces: Vec<String>,
}

impl Default for ReproConfig {
    fn default() -> Self {
        let system_namespaces: Vec<String> = ["pg_catalog", "information_schema", "pg_toast", "gp_toolkit"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut default_namespaces = vec!["public".to_string()];
        default_namespaces.extend(system_namespaces.iter().cloned());

        Self {
            host: None,
            port: None,
            user: None,
            dbname: String::new(),
            include_sketches: false,
            plan_trace: false,
            ddl_mode: DdlMode::Oids,
            batch_size: 1000,
            dependency_function: "gp_dump_query_oids".to_string(),
            pg_dump_path: PathBuf::from("pg_dump"),
            psql_path: PathBuf::from("psql"),
            staging_dir: std::env::temp_dir().join("minirepro"),
            system_namespaces,
            default_namespaces,
        }
    }
}

impl ReproConfig {
    /// Load configuration from a JSON file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("JSON parse error in {}: {}", path.display(), e)))
    }

    /// Fill unset connection fields from `PGHOST`, `PGPORT`, `PGUSER` and
    /// `PGDATABASE`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.host.is_none() {
            self.host = lookup("PGHOST");
        }
        if self.port.is_none() {
            if let Some(port) = lookup("PGPORT") {
                let port = port
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid PGPORT: {}", port)))?;
                self.port = Some(port);
            }
        }
        if self.user.is_none() {
            self.user = lookup("PGUSER");
        }
        if self.dbname.is_empty() {
            if let Some(dbname) = lookup("PGDATABASE") {
                self.dbname = dbname;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dbname.is_empty() {
            return Err(Error::Config("database name is required".into()));
        }
        if self.batch_size == 0 || self.batch_size > i32::MAX as usize {
            return Err(Error::Config(format!(
                "batch_size must be between 1 and {}",
                i32::MAX
            )));
        }
        if !is_plain_function_name(&self.dependency_function) {
            return Err(Error::Config(format!(
                "dependency_function is not a plain identifier: {}",
                self.dependency_function
            )));
        }
        Ok(())
    }

    pub fn is_system_namespace(&self, namespace: &str) -> bool {
        self.system_namespaces.iter().any(|n| n == namespace)
    }

    pub fn is_default_namespace(&self, namespace: &str) -> bool {
        self.default_namespaces.iter().any(|n| n == namespace)
    }

    /// libpq-style connection string for the catalog reader.
    pub fn connection_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(host) = &self.host {
            parts.push(format!("host={}", conninfo_value(host)));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={}", port));
        }
        if let Some(user) = &self.user {
            parts.push(format!("user={}", conninfo_value(user)));
        }
        parts.push(format!("dbname={}", conninfo_value(&self.dbname)));
        parts.push("application_name=minirepro".to_string());
        parts.join(" ")
    }
}

// The function name is spliced into SQL text, so only `name` or
// `schema.name` made of identifier characters is accepted.
fn is_plain_function_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn conninfo_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
