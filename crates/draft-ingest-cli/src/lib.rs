//! Command surface for the draft ingestion store.
//!
//! - [`run_cli`] executes a parsed [`Cli`].
//! - [`run_with_store`] executes a store-backed command against an open
//!   [`SqliteDraftStore`], for hosts that manage their own database handle.
//! - [`init_tracing`] installs the stderr log subscriber used by `draftdb`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use draft_ingest_core::{normalize_tournament_fields, ChampionTable, MatchRecord};
use draft_ingest_store_sqlite::{BatchReport, DraftWriteOutcome, SqliteDraftStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn,draft_ingest_store_sqlite=info,draft_ingest_cli=info";

#[derive(Debug, Parser)]
#[command(name = "draftdb")]
#[command(about = "Competitive draft ingestion store")]
pub struct Cli {
    #[arg(long, env = "DRAFTDB_PATH", default_value = "./draft_data.sqlite3")]
    db: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Ingest(IngestArgs),
    Tournament {
        #[command(subcommand)]
        command: TournamentCommand,
    },
    Games {
        #[command(subcommand)]
        command: GamesCommand,
    },
    Stats,
}

/// Commands that need an open draft store.
#[derive(Debug)]
pub enum StoreCommand {
    Ingest(IngestArgs),
    Games(GamesCommand),
    Stats,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// JSON array of match records.
    #[arg(long)]
    input: PathBuf,
    /// Champion name/alias table.
    #[arg(long, env = "DRAFTDB_CHAMPIONS")]
    champions: PathBuf,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum TournamentCommand {
    Key(TournamentKeyArgs),
}

#[derive(Debug, Args)]
pub struct TournamentKeyArgs {
    #[arg(long)]
    region: String,
    #[arg(long)]
    season: Option<String>,
    #[arg(long)]
    split: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum GamesCommand {
    List(GamesListArgs),
    Show(GamesShowArgs),
}

#[derive(Debug, Args)]
pub struct GamesListArgs {
    #[arg(long)]
    tournament: String,
}

#[derive(Debug, Args)]
pub struct GamesShowArgs {
    #[arg(long)]
    id: i64,
}

/// Installs a stderr `tracing` subscriber. `RUST_LOG` overrides the default
/// filter.
///
/// # Errors
/// Returns an error when a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

/// Executes the parsed top-level command.
///
/// # Errors
/// Returns an error when the database cannot be prepared, input files are
/// unreadable, or the command itself fails. `ingest` also fails when any
/// record was rejected, after printing the report.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Tournament { command } => run_tournament(command),
        Command::Ingest(args) => open_and_run(&cli.db, StoreCommand::Ingest(args)),
        Command::Games { command } => open_and_run(&cli.db, StoreCommand::Games(command)),
        Command::Stats => open_and_run(&cli.db, StoreCommand::Stats),
    }
}

fn open_and_run(db: &Path, command: StoreCommand) -> Result<()> {
    let mut store = SqliteDraftStore::open(db)?;
    store.ensure_schema()?;
    run_with_store(command, &mut store)
}

/// Executes a store-backed command against an existing store handle.
///
/// # Errors
/// See [`run_cli`].
pub fn run_with_store(command: StoreCommand, store: &mut SqliteDraftStore) -> Result<()> {
    match command {
        StoreCommand::Ingest(args) => run_ingest(&args, store),
        StoreCommand::Games(command) => run_games(command, store),
        StoreCommand::Stats => {
            let counts = store.table_counts()?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(())
        }
    }
}

fn run_ingest(args: &IngestArgs, store: &mut SqliteDraftStore) -> Result<()> {
    let records = load_records(&args.input)?;
    let champions = load_champions(&args.champions)?;
    info!(
        records = records.len(),
        champions = champions.len(),
        "starting ingest"
    );

    let report = store.ingest_batch(&records, &champions);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_batch_report(&report);
    }

    if !report.is_clean() {
        return Err(anyhow!(
            "{} of {} records failed to ingest",
            report.failures.len(),
            report.processed
        ));
    }
    Ok(())
}

fn run_tournament(command: TournamentCommand) -> Result<()> {
    match command {
        TournamentCommand::Key(args) => {
            let key = normalize_tournament_fields(
                &args.region,
                args.season.as_deref(),
                args.split.as_deref(),
            )?;
            println!("{key}");
            Ok(())
        }
    }
}

fn run_games(command: GamesCommand, store: &SqliteDraftStore) -> Result<()> {
    match command {
        GamesCommand::List(args) => {
            let ids = store.game_ids_by_tournament(&args.tournament)?;
            println!("{}", serde_json::to_string_pretty(&ids)?);
            Ok(())
        }
        GamesCommand::Show(args) => {
            let Some(draft) = store.match_draft(args.id)? else {
                return Err(anyhow!("game not found: {}", args.id));
            };
            println!("{}", serde_json::to_string_pretty(&draft)?);
            Ok(())
        }
    }
}

fn load_records(path: &Path) -> Result<Vec<MatchRecord>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read records from {}", path.display()))?;
    serde_json::from_str(&body)
        .with_context(|| format!("records file {} is not a JSON array of records", path.display()))
}

fn load_champions(path: &Path) -> Result<ChampionTable> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read champion table from {}", path.display()))?;
    ChampionTable::from_json_str(&body)
        .with_context(|| format!("invalid champion table {}", path.display()))
}

fn outcome_label(outcome: &DraftWriteOutcome) -> String {
    match outcome {
        DraftWriteOutcome::Written { rows } => format!("written:{rows}"),
        DraftWriteOutcome::AlreadyPresent => "skipped".to_string(),
    }
}

fn print_batch_report(report: &BatchReport) {
    println!(
        "contract={} processed={} ingested={} failed={} unresolved_champions={}",
        report.contract_version,
        report.processed,
        report.ingested.len(),
        report.failures.len(),
        report.unresolved_champions
    );
    println!(
        "{:<24} {:<8} {:<8} {:<12} {:<12}",
        "tournament", "game", "id", "bans", "picks"
    );
    println!("{}", "-".repeat(70));
    for item in &report.ingested {
        println!(
            "{:<24} {:<8} {:<8} {:<12} {:<12}",
            item.tournament,
            item.tourn_game_id,
            item.game_id,
            outcome_label(&item.bans.outcome),
            outcome_label(&item.picks.outcome)
        );
    }
    for failure in &report.failures {
        println!(
            "failed index={} tourn_game_id={} kind={:?} message={}",
            failure.index, failure.tourn_game_id, failure.kind, failure.message
        );
    }
}
