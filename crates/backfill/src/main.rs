//! backfill: CLI for the synthetic token allowance owner backfill
//!
//! ```text
//! backfill run [--dry-run] [--force] [--batch-size N] [--json]
//! backfill status [--json]
//! backfill seed [--families N] [--history-depth D]
//! backfill checksum
//! ```
//!
//! Exit codes: 0 on success, 1 on a failed command, 2 on invalid
//! configuration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use backfill_core::config::Config;
use backfill_core::fixtures::{BulkBuilder, DomainBuilder};
use backfill_core::logging::{LogFormat, init_logging};
use backfill_core::migration::{MigrationReport, OWNER_BACKFILL_DESCRIPTION};
use backfill_core::model::AllowanceTable;
use backfill_core::runner::{LedgerEntry, MigrationLedger, RunOutcome, run_migration_async};
use backfill_core::{SqliteStore, SyntheticTokenAllowanceOwnerMigration};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(name = "backfill")]
#[command(version = backfill_core::VERSION)]
#[command(about = "Repair owner on synthetic token allowances from contract results")]
struct Cli {
    /// Database file (overrides storage.db_path)
    #[arg(long, global = true, env = "BACKFILL_DB")]
    db: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "BACKFILL_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the owner backfill
    Run {
        /// Compute corrections without writing them
        #[arg(long)]
        dry_run: bool,

        /// Run even if the ledger says this checksum is applied
        #[arg(long)]
        force: bool,

        /// Rows per chunk (overrides migration.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show row counts, state fingerprint and ledger entries
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Insert generated allowance families for testing
    Seed {
        /// Number of identity keys to generate
        #[arg(long, default_value_t = 100)]
        families: usize,

        /// History versions per identity key
        #[arg(long, default_value_t = 2)]
        history_depth: usize,
    },

    /// Print the migration checksum
    Checksum,
}

#[derive(Serialize)]
struct StatusReport {
    db_path: PathBuf,
    current_rows: u64,
    history_rows: u64,
    contract_results: u64,
    fingerprint: String,
    applied_checksum: Option<i32>,
    migrations: Vec<LedgerEntry>,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.storage.db_path.clone_from(db);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    if let Command::Run {
        dry_run,
        batch_size,
        ..
    } = &cli.command
    {
        if *dry_run {
            config.migration.dry_run = true;
        }
        if let Some(batch_size) = batch_size {
            config.migration.batch_size = *batch_size;
        }
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    let store = SqliteStore::open(&config.storage.db_path, config.storage.busy_timeout())
        .with_context(|| {
            format!(
                "failed to open database {}",
                config.storage.db_path.display()
            )
        })?;
    Ok(store)
}

fn print_report(report: &MigrationReport) {
    let verb = if report.dry_run {
        "Would correct"
    } else {
        "Corrected"
    };
    let (current, history) = if report.dry_run {
        (
            report.rows.current.needs_correction,
            report.rows.history.needs_correction,
        )
    } else {
        (report.rows.current.corrected, report.rows.history.corrected)
    };
    println!("{verb} {current} current and {history} history rows");
    let total = report.rows.total();
    println!(
        "  examined: {}  already correct: {}  uncorrelated: {}  missing payer: {}",
        total.examined, total.already_correct, total.uncorrelated, total.missing_join_key
    );
    if total.conflicts > 0 {
        println!(
            "  skipped (changed during run): {}; run again to finish",
            total.conflicts
        );
    }
    if report.index.duplicates > 0 {
        println!(
            "  duplicate contract results (last one kept): {}",
            report.index.duplicates
        );
    }
    println!("  elapsed: {} ms", report.elapsed_ms);
}

async fn run_command(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Command::Run { force, json, .. } => {
            let outcome = run_migration_async(config, force).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }
            match &outcome {
                RunOutcome::Skipped {
                    description,
                    checksum,
                } => {
                    println!("Skipped: {description} (checksum {checksum}) is already applied");
                    println!("  Use --force to run it again.");
                }
                RunOutcome::Applied(report) | RunOutcome::DryRun(report) => print_report(report),
            }
        }
        Command::Status { json } => {
            let store = open_store(&config)?;
            let status = StatusReport {
                db_path: config.storage.db_path.clone(),
                current_rows: store.count(AllowanceTable::Current)?,
                history_rows: store.count(AllowanceTable::History)?,
                contract_results: store.count_contract_results()?,
                fingerprint: store.state_fingerprint()?,
                applied_checksum: store.applied_checksum(OWNER_BACKFILL_DESCRIPTION)?,
                migrations: store.applied_migrations()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }
            println!("Database: {}", status.db_path.display());
            println!("  token_allowance rows:         {}", status.current_rows);
            println!("  token_allowance_history rows: {}", status.history_rows);
            println!("  contract_result rows:         {}", status.contract_results);
            println!("  fingerprint: {}", status.fingerprint);
            match status.applied_checksum {
                Some(checksum) => println!("  owner backfill: applied (checksum {checksum})"),
                None => println!("  owner backfill: not applied"),
            }
        }
        Command::Seed {
            families,
            history_depth,
        } => {
            let mut store = open_store(&config)?;
            let mut builder = DomainBuilder::continuing(&store)?;
            let summary = BulkBuilder::new()
                .count(families)
                .history_depth(history_depth)
                .persist(&mut builder, &mut store)?;
            println!(
                "Seeded {} families: {} incorrect, {} uncorrelated, {} already correct",
                summary.families, summary.incorrect, summary.uncorrelated, summary.already_correct
            );
            println!(
                "  rows: {} current, {} history, {} contract results",
                summary.current_rows, summary.history_rows, summary.contract_results
            );
        }
        Command::Checksum => {
            println!("{}", SyntheticTokenAllowanceOwnerMigration::CHECKSUM);
        }
    }
    Ok(())
}

fn report_error(err: &anyhow::Error) -> ExitCode {
    eprintln!("Error: {err:#}");
    let core = err.downcast_ref::<backfill_core::Error>();
    if let Some(remediation) = core.and_then(backfill_core::Error::remediation) {
        eprint!("{}", remediation.render_plain());
    }
    match core {
        Some(backfill_core::Error::Config(_)) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => return report_error(&err),
    };
    if let Err(err) = init_logging(&config.logging) {
        eprintln!("Error: failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }
    debug!(db_path = %config.storage.db_path.display(), "Loaded configuration");

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_error(&err),
    }
}
