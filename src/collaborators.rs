//! External collaborators: DDL extraction and plan-trace capture.
//!
//! Both are reached through traits returning raw bytes so the driver never
//! depends on how the output is produced; the process-backed implementations
//! shell out to `pg_dump` and `psql`.

use crate::catalog::QueryDependencies;
use crate::config::{DdlMode, ReproConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Objects whose schema-only definitions are needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlRequest {
    Oids {
        relation_ids: Vec<u32>,
        function_ids: Vec<u32>,
    },
    Names(Vec<String>),
}

impl DdlRequest {
    pub fn from_dependencies(mode: DdlMode, deps: &QueryDependencies) -> Result<Self> {
        match mode {
            DdlMode::Oids => Ok(DdlRequest::Oids {
                relation_ids: deps.relation_ids.clone(),
                function_ids: deps.function_ids.clone(),
            }),
            DdlMode::Names => deps
                .relation_names
                .clone()
                .map(DdlRequest::Names)
                .ok_or_else(|| {
                    Error::Dependency("reduced DDL mode needs relation names".into())
                }),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DdlRequest::Oids {
                relation_ids,
                function_ids,
            } => relation_ids.is_empty() && function_ids.is_empty(),
            DdlRequest::Names(names) => names.is_empty(),
        }
    }
}

#[async_trait]
pub trait DdlExtractor: Send + Sync {
    async fn extract(&self, request: &DdlRequest) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait PlanTracer: Send + Sync {
    async fn trace(&self, query: &str) -> Result<Vec<u8>>;
}

/// Connection flags shared by the client programs.
#[derive(Debug, Clone, Default)]
pub struct ConnectionArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub dbname: String,
}

impl ConnectionArgs {
    pub fn from_config(config: &ReproConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            dbname: config.dbname.clone(),
        }
    }

    fn flags(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.push("-h".into());
            args.push(host.into());
        }
        if let Some(port) = self.port {
            args.push("-p".into());
            args.push(port.to_string().into());
        }
        if let Some(user) = &self.user {
            args.push("-U".into());
            args.push(user.into());
        }
        args
    }
}

/// Schema-only dump through `pg_dump`, staged in the run's directory.
#[derive(Debug, Clone)]
pub struct PgDump {
    pub program: PathBuf,
    pub connection: ConnectionArgs,
    pub staging_dir: PathBuf,
}

impl PgDump {
    pub fn new(config: &ReproConfig, staging_dir: &Path) -> Self {
        Self {
            program: config.pg_dump_path.clone(),
            connection: ConnectionArgs::from_config(config),
            staging_dir: staging_dir.to_path_buf(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.staging_dir.join("ddl.sql")
    }

    async fn dump(&self, request: &DdlRequest) -> Result<Vec<u8>> {
        run_program(&self.program, &self.arguments(request)).await?;
        Ok(tokio::fs::read(self.output_path()).await?)
    }

    pub fn arguments(&self, request: &DdlRequest) -> Vec<OsString> {
        let mut args = self.connection.flags();
        args.push("--schema-only".into());
        match request {
            DdlRequest::Oids {
                relation_ids,
                function_ids,
            } => {
                if !relation_ids.is_empty() {
                    args.push(format!("--relation-oids={}", join_ids(relation_ids)).into());
                }
                if !function_ids.is_empty() {
                    args.push(format!("--function-oids={}", join_ids(function_ids)).into());
                }
            }
            DdlRequest::Names(names) => {
                for name in names {
                    args.push("-t".into());
                    args.push(name.into());
                }
            }
        }
        args.push("-f".into());
        args.push(self.output_path().into());
        args.push(self.connection.dbname.clone().into());
        args
    }
}

#[async_trait]
impl DdlExtractor for PgDump {
    async fn extract(&self, request: &DdlRequest) -> Result<Vec<u8>> {
        if request.is_empty() {
            return Ok(Vec::new());
        }
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let result = self.dump(request).await;

        // The staged file is only an intermediate; drop it whether or not the
        // dump succeeded
        if let Err(e) = tokio::fs::remove_dir_all(&self.staging_dir).await {
            warn!(dir = %self.staging_dir.display(), "failed to remove staging directory: {}", e);
        }

        let ddl = result?;
        info!(bytes = ddl.len(), "extracted schema definitions");
        Ok(ddl)
    }
}

/// Plan trace as `EXPLAIN (VERBOSE)` output captured through `psql`.
#[derive(Debug, Clone)]
pub struct PsqlExplain {
    pub program: PathBuf,
    pub connection: ConnectionArgs,
}

impl PsqlExplain {
    pub fn new(config: &ReproConfig) -> Self {
        Self {
            program: config.psql_path.clone(),
            connection: ConnectionArgs::from_config(config),
        }
    }

    pub fn arguments(&self, query: &str) -> Vec<OsString> {
        let mut args = self.connection.flags();
        for flag in ["-X", "-A", "-t", "-v", "ON_ERROR_STOP=1"] {
            args.push(flag.into());
        }
        args.push("-c".into());
        args.push(format!("EXPLAIN (VERBOSE) {}", query.trim().trim_end_matches(';')).into());
        args.push("-d".into());
        args.push(self.connection.dbname.clone().into());
        args
    }
}

#[async_trait]
impl PlanTracer for PsqlExplain {
    async fn trace(&self, query: &str) -> Result<Vec<u8>> {
        run_program(&self.program, &self.arguments(query)).await
    }
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

/// Run a program to completion, returning stdout. A non-zero exit becomes
/// [`Error::Collaborator`] carrying the exit status and stderr.
pub async fn run_program(program: &Path, args: &[OsString]) -> Result<Vec<u8>> {
    debug!(program = %program.display(), ?args, "running collaborator");
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Collaborator {
            program: program.display().to_string(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::Collaborator {
            program: program.display().to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionArgs {
        ConnectionArgs {
            host: Some("db1".to_string()),
            port: Some(5432),
            user: None,
            dbname: "sales".to_string(),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_request_from_dependencies() {
        let deps = QueryDependencies {
            relation_ids: vec![1, 2],
            function_ids: vec![3],
            relation_names: None,
        };
        assert_eq!(
            DdlRequest::from_dependencies(DdlMode::Oids, &deps).unwrap(),
            DdlRequest::Oids {
                relation_ids: vec![1, 2],
                function_ids: vec![3]
            }
        );
        assert!(DdlRequest::from_dependencies(DdlMode::Names, &deps).is_err());
    }

    #[test]
    fn test_pg_dump_arguments() {
        let dump = PgDump {
            program: PathBuf::from("pg_dump"),
            connection: connection(),
            staging_dir: PathBuf::from("/tmp/run"),
        };
        let oids = DdlRequest::Oids {
            relation_ids: vec![16384, 16390],
            function_ids: vec![],
        };
        assert_eq!(
            strings(dump.arguments(&oids)),
            vec![
                "-h",
                "db1",
                "-p",
                "5432",
                "--schema-only",
                "--relation-oids=16384,16390",
                "-f",
                "/tmp/run/ddl.sql",
                "sales"
            ]
        );

        let names = DdlRequest::Names(vec!["public.orders".to_string()]);
        let args = strings(dump.arguments(&names));
        assert!(args.windows(2).any(|w| w == ["-t", "public.orders"]));
    }

    #[test]
    fn test_psql_explain_arguments() {
        let explain = PsqlExplain {
            program: PathBuf::from("psql"),
            connection: connection(),
        };
        let args = strings(explain.arguments("select 1;\n"));
        assert!(args.contains(&"EXPLAIN (VERBOSE) select 1".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("sales"));
    }

    #[tokio::test]
    async fn test_empty_request_skips_dump() {
        let dump = PgDump {
            program: PathBuf::from("/nonexistent/pg_dump"),
            connection: connection(),
            staging_dir: PathBuf::from("/nonexistent"),
        };
        let ddl = dump.extract(&DdlRequest::Names(vec![])).await.unwrap();
        assert!(ddl.is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_collaborator_error() {
        let err = run_program(Path::new("/nonexistent/program"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Collaborator { ref status, .. } if status == "not started"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_exit_carries_stderr() {
        let args: Vec<OsString> = vec!["-c".into(), "echo 'no such relation' >&2; exit 3".into()];
        let err = run_program(Path::new("sh"), &args).await.unwrap_err();
        match err {
            Error::Collaborator { status, stderr, .. } => {
                assert!(status.contains('3'));
                assert_eq!(stderr, "no such relation");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    // Stand-in dump program: writes to the file following -f, then exits
    // with `status`
    #[cfg(unix)]
    fn fake_pg_dump(dir: &Path, status: i32) -> PgDump {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("fake_pg_dump");
        std::fs::write(
            &program,
            format!(
                "#!/bin/sh\n\
                 while [ \"$#\" -gt 0 ]; do\n\
                 if [ \"$1\" = \"-f\" ]; then shift; echo 'CREATE TABLE t (a int);' > \"$1\"; fi\n\
                 shift\n\
                 done\n\
                 exit {}\n",
                status
            ),
        )
        .unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        PgDump {
            program,
            connection: connection(),
            staging_dir: dir.join("run"),
        }
    }

    fn oid_request() -> DdlRequest {
        DdlRequest::Oids {
            relation_ids: vec![16384],
            function_ids: vec![],
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pg_dump_reads_staged_output_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dump = fake_pg_dump(dir.path(), 0);

        let ddl = dump.extract(&oid_request()).await.unwrap();
        assert_eq!(ddl, b"CREATE TABLE t (a int);\n");
        assert!(!dump.staging_dir.exists());
        assert!(dir.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_dump_still_removes_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dump = fake_pg_dump(dir.path(), 2);

        let err = dump.extract(&oid_request()).await.unwrap_err();
        assert!(matches!(err, Error::Collaborator { .. }));
        assert!(!dump.staging_dir.exists());
    }
}
