use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use dbsnap_core::{
    DATABASE_URL_ENV, DumpGenerator, ProductionSwap, SchemaIntrospector, SessionConfig,
    SqlExecutor, SwapState,
};
use dbsnap_postgres::PgExecutor;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

const EXAMPLE_DATABASE_URL: &str = "postgres://postgres@localhost:5432/app_test";

/// CLI output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliOutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "dbsnap")]
#[command(version = PACKAGE_VERSION)]
#[command(about = "Inspect test snapshots and manage the production database swap")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    /// YAML session configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database URL; overrides the configuration file and DBSNAP_DATABASE_URL.
    #[arg(long, global = true)]
    url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the live and backup databases and the swap state.
    Status,
    /// List the tables and sequences a snapshot would cover.
    List(ListArgs),
    /// Write the current contents as a replayable SQL script.
    Dump(DumpArgs),
    /// Move the live database to its backup name and create an empty one.
    SaveProduction,
    /// Drop the test database and move the backup back to the live name.
    RestoreProduction,
    /// Write a default configuration file.
    InitConfig(InitConfigArgs),
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Output format.
    #[arg(long, default_value = "text")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct DumpArgs {
    /// Output file (default: stdout).
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct InitConfigArgs {
    /// Path of the configuration file to create.
    path: PathBuf,
    /// Database URL to write into the file.
    #[arg(long)]
    database_url: Option<String>,
    /// Overwrite an existing file.
    #[arg(long)]
    force: bool,
}

/// Objects covered by snapshots of one database.
#[derive(Debug, Serialize)]
struct Listing {
    database: String,
    skip_marker: String,
    tables: Vec<String>,
    sequences: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Status => run_status(&cli.connection),
        Command::List(args) => run_list(&cli.connection, args),
        Command::Dump(args) => run_dump(&cli.connection, args),
        Command::SaveProduction => run_save_production(&cli.connection),
        Command::RestoreProduction => run_restore_production(&cli.connection),
        Command::InitConfig(args) => run_init_config(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

// ---------------------------------------------------------------------------
// inspection commands
// ---------------------------------------------------------------------------

fn run_status(connection: &ConnectionArgs) -> Result<(), String> {
    let config = load_config(connection)?;
    let mut executor = connect(&config)?;
    let swap = ProductionSwap::from_config(&mut executor, &config)
        .map_err(|e| format!("Failed to inspect databases: {e}"))?;

    let identity = swap.identity();
    println!("Database status:");
    println!("  Live database: {}", identity.live());
    println!(
        "  Backup database: {} ({})",
        identity.backup(),
        if swap.state() == SwapState::BackedUp {
            "present"
        } else {
            "absent"
        }
    );
    println!("  Swap state: {}", describe_state(swap.state()));
    println!("  Maintenance database: {}", config.maintenance_database);
    if swap.is_inherited() {
        println!();
        println!(
            "A backup is present. If no test session is running, `dbsnap restore-production` moves it back."
        );
    }
    Ok(())
}

fn run_list(connection: &ConnectionArgs, args: ListArgs) -> Result<(), String> {
    let config = load_config(connection)?;
    let mut executor = connect(&config)?;
    let database = executor.database().to_string();

    let mut introspector = SchemaIntrospector::new(&mut executor, &config.skip_marker);
    let tables = introspector
        .list_tables()
        .map_err(|e| format!("Failed to list tables: {e}"))?;
    let sequences = introspector
        .list_sequences()
        .map_err(|e| format!("Failed to list sequences: {e}"))?;

    let listing = Listing {
        database,
        skip_marker: config.skip_marker.clone(),
        tables,
        sequences,
    };
    println!("{}", format_listing(&listing, args.format)?);
    Ok(())
}

fn run_dump(connection: &ConnectionArgs, args: DumpArgs) -> Result<(), String> {
    let config = load_config(connection)?;
    let mut executor = connect(&config)?;
    let database = executor.database().to_string();

    let snapshot = DumpGenerator::new(&mut executor, &config.skip_marker)
        .snapshot(&database)
        .map_err(|e| format!("Failed to dump '{database}': {e}"))?;
    let script = format!(
        "-- dbsnap {PACKAGE_VERSION} dump of {database} at {}\n{}\n",
        snapshot.captured_at().to_rfc3339(),
        snapshot.to_sql()
    );

    match args.output {
        Some(path) => {
            fs::write(&path, script)
                .map_err(|e| format!("Failed to write '{}': {e}", path.display()))?;
            eprintln!(
                "Wrote {} statements ({} tables, {} sequences) to {}",
                snapshot.statements().len(),
                snapshot.tables().len(),
                snapshot.sequences().len(),
                path.display()
            );
        }
        None => print!("{script}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// production swap commands
// ---------------------------------------------------------------------------

fn run_save_production(connection: &ConnectionArgs) -> Result<(), String> {
    let config = load_config(connection)?;
    let mut executor = connect(&config)?;
    let mut swap = ProductionSwap::from_config(&mut executor, &config)
        .map_err(|e| format!("Failed to inspect databases: {e}"))?;

    if swap.state() == SwapState::BackedUp {
        println!(
            "Backup '{}' already exists; nothing to do.",
            swap.identity().backup()
        );
        return Ok(());
    }
    swap.save_production(&mut executor)
        .map_err(|e| format!("Failed to save production database: {e}"))?;
    info!(backup = swap.identity().backup(), "production saved from cli");
    println!(
        "Moved '{}' to '{}' and created an empty '{}'.",
        swap.identity().live(),
        swap.identity().backup(),
        swap.identity().live()
    );
    Ok(())
}

fn run_restore_production(connection: &ConnectionArgs) -> Result<(), String> {
    let config = load_config(connection)?;
    let mut executor = connect(&config)?;
    let mut swap = ProductionSwap::from_config(&mut executor, &config)
        .map_err(|e| format!("Failed to inspect databases: {e}"))?;

    swap.restore_production(&mut executor)
        .map_err(|e| format!("Failed to restore production database: {e}"))?;
    info!(live = swap.identity().live(), "production restored from cli");
    println!(
        "Dropped the test database and moved '{}' back to '{}'.",
        swap.identity().backup(),
        swap.identity().live()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// init-config command
// ---------------------------------------------------------------------------

fn run_init_config(args: InitConfigArgs) -> Result<(), String> {
    if args.path.exists() && !args.force {
        return Err(format!(
            "'{}' already exists (use --force to overwrite)",
            args.path.display()
        ));
    }
    let url = args
        .database_url
        .unwrap_or_else(|| EXAMPLE_DATABASE_URL.to_string());
    let config = SessionConfig::from_url(url);
    config
        .save(&args.path)
        .map_err(|e| format!("Failed to write '{}': {e}", args.path.display()))?;
    println!("Wrote default configuration to {}", args.path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolves the session configuration.
///
/// Precedence, lowest first: configuration file, `DBSNAP_DATABASE_URL`,
/// `--url`.
fn load_config(connection: &ConnectionArgs) -> Result<SessionConfig, String> {
    let config = match &connection.config {
        Some(path) => load_config_file(path)?,
        None => SessionConfig::from_url(String::new()),
    };
    let config = apply_url(config.with_env_overrides(), connection.url.as_deref());
    if config.database_url.trim().is_empty() {
        return Err(format!(
            "no database configured (pass --url or --config, or set {DATABASE_URL_ENV})"
        ));
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<SessionConfig, String> {
    SessionConfig::load(path)
        .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))
}

fn apply_url(mut config: SessionConfig, url: Option<&str>) -> SessionConfig {
    if let Some(url) = url.filter(|url| !url.trim().is_empty()) {
        config.database_url = url.to_string();
    }
    config
}

fn connect(config: &SessionConfig) -> Result<PgExecutor, String> {
    PgExecutor::from_config(config).map_err(|e| format!("Failed to connect: {e}"))
}

fn describe_state(state: SwapState) -> &'static str {
    match state {
        SwapState::Normal => "normal",
        SwapState::BackedUp => "backed up",
    }
}

fn format_listing(listing: &Listing, format: CliOutputFormat) -> Result<String, String> {
    match format {
        CliOutputFormat::Json => serde_json::to_string_pretty(listing)
            .map_err(|e| format!("Failed to serialize listing: {e}")),
        CliOutputFormat::Text => {
            let mut out = format!(
                "Database: {} (skip marker '{}')\n",
                listing.database, listing.skip_marker
            );
            out.push_str(&format!("Tables ({}):\n", listing.tables.len()));
            for table in &listing.tables {
                out.push_str(&format!("  {table}\n"));
            }
            out.push_str(&format!("Sequences ({}):", listing.sequences.len()));
            for sequence in &listing.sequences {
                out.push_str(&format!("\n  {sequence}"));
            }
            Ok(out)
        }
    }
}
