use chrono::Utc;
use clap::{Arg, ArgMatches, Command};
use minirepro::logging::{init_logging, parse_level};
use minirepro::repro::run_staging_dir;
use minirepro::{
    generate, DdlMode, PgCatalog, PgDump, PlanTracer, PsqlExplain, ReproConfig, ReproRequest,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::error;

/// Minimal repro generator
///
/// Writes a script holding the DDL and planner statistics a query depends on.
/// Replaying it on an empty database lets the optimizer produce the same plan
/// as on the source, without shipping any table data.

#[tokio::main]
async fn main() {
    let matches = create_cli().get_matches();

    let level = parse_level(
        matches
            .get_one::<String>("log-level")
            .map(String::as_str)
            .unwrap_or("info"),
    );
    init_logging(level, matches.get_flag("json-logs"));

    if let Err(e) = run(&matches).await {
        error!(code = e.error_code(), "{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn create_cli() -> Command {
    Command::new("minirepro")
        .about("Dump the DDL and planner statistics needed to reproduce a query plan")
        .version(env!("CARGO_PKG_VERSION"))
        .disable_help_flag(true)
        .arg(Arg::new("help")
            .help("Print help")
            .long("help")
            .action(clap::ArgAction::Help))
        .arg(Arg::new("dbname")
            .help("Source database name")
            .index(1))
        .arg(Arg::new("query-file")
            .help("File holding the query to reproduce")
            .short('q')
            .long("query-file")
            .required(true))
        .arg(Arg::new("output")
            .help("Output file (stdout when omitted)")
            .short('f')
            .long("output"))
        .arg(Arg::new("host")
            .help("Database server host")
            .short('h')
            .long("host"))
        .arg(Arg::new("port")
            .help("Database server port")
            .short('p')
            .long("port")
            .value_parser(clap::value_parser!(u16)))
        .arg(Arg::new("user")
            .help("Database user name")
            .short('U')
            .long("user"))
        .arg(Arg::new("include-sketches")
            .help("Include cardinality-sketch payloads (may expose column values)")
            .long("include-sketches")
            .visible_alias("hll")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("plan-trace")
            .help("Append the query plan as commentary")
            .long("plan-trace")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("reduced")
            .help("Dump DDL by relation name only")
            .long("reduced")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("config")
            .help("JSON configuration file")
            .long("config"))
        .arg(Arg::new("batch-size")
            .help("Catalog rows fetched per round trip")
            .long("batch-size")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("staging-dir")
            .help("Directory for collaborator output")
            .long("staging-dir"))
        .arg(Arg::new("log-level")
            .help("Log level")
            .long("log-level")
            .value_parser(["error", "warn", "info", "debug", "trace"])
            .default_value("info"))
        .arg(Arg::new("json-logs")
            .help("Emit logs as JSON")
            .long("json-logs")
            .action(clap::ArgAction::SetTrue))
}

fn load_config(matches: &ArgMatches) -> minirepro::Result<ReproConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ReproConfig::from_file(Path::new(path))?,
        None => ReproConfig::default(),
    };

    if let Some(dbname) = matches.get_one::<String>("dbname") {
        config.dbname = dbname.clone();
    }
    if let Some(host) = matches.get_one::<String>("host") {
        config.host = Some(host.clone());
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = Some(*port);
    }
    if let Some(user) = matches.get_one::<String>("user") {
        config.user = Some(user.clone());
    }
    if let Some(batch_size) = matches.get_one::<usize>("batch-size") {
        config.batch_size = *batch_size;
    }
    if let Some(dir) = matches.get_one::<String>("staging-dir") {
        config.staging_dir = PathBuf::from(dir);
    }
    if matches.get_flag("include-sketches") {
        config.include_sketches = true;
    }
    if matches.get_flag("plan-trace") {
        config.plan_trace = true;
    }
    if matches.get_flag("reduced") {
        config.ddl_mode = DdlMode::Names;
    }

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

async fn run(matches: &ArgMatches) -> minirepro::Result<()> {
    let config = load_config(matches)?;

    let query_file = matches
        .get_one::<String>("query-file")
        .ok_or_else(|| minirepro::Error::Config("--query-file is required".into()))?;
    let request = ReproRequest {
        query: std::fs::read_to_string(query_file)?,
        command_line: std::env::args().collect::<Vec<_>>().join(" "),
    };

    let staging_dir = run_staging_dir(&config, Utc::now());
    let ddl = PgDump::new(&config, &staging_dir);
    let explain = PsqlExplain::new(&config);
    let tracer: Option<&dyn PlanTracer> = if config.plan_trace {
        Some(&explain)
    } else {
        None
    };

    let mut catalog = PgCatalog::connect(&config).await?;

    let out: Box<dyn Write + Send> = match matches.get_one::<String>("output") {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let (_, summary) = generate(&config, &mut catalog, &ddl, tracer, &request, out).await?;

    eprintln!("✓ Repro written");
    eprintln!("  Relations:            {}", summary.cardinalities);
    eprintln!("  Column statistics:    {}", summary.statistics_rows);
    eprintln!("  Extended statistics:  {}", summary.extended_statistics);
    eprintln!("  DDL bytes:            {}", summary.ddl_bytes);
    if summary.plan_trace {
        eprintln!("  Plan trace:           included");
    }
    Ok(())
}
