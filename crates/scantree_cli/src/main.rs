//! Command line host for the scan tree store.
//!
//! # Responsibility
//! - Apply application/resource trees read as JSON to a store.
//! - Print persisted trees and the quick-scan configuration.

use clap::{Parser, Subcommand};
use log::{info, warn};
use scantree_core::{
    default_log_level, init_logging, load_application, open_store, Application, ConfigRepoError,
    ObjectTree, PendingViewRefresh, QuickScanConfig, QuickScanConfigRepository, Resource,
    SqliteObjectTree, SqliteQuickScanConfigRepository, StoreConfig, TransactionParams,
};
use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "scantree", version, about = "Persist and inspect scan finding trees")]
struct Cli {
    /// SQLite database file; in-memory when omitted
    #[arg(long, global = true, env = "SCANTREE_DB_PATH")]
    db: Option<PathBuf>,

    /// Database driver: local, postgres or another name
    #[arg(long, global = true, env = "SCANTREE_DB_DRIVER")]
    driver: Option<String>,

    /// Absolute directory for rolling log files; logging is off when omitted
    #[arg(long, global = true, env = "SCANTREE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true, env = "SCANTREE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Leave package -> vulnerability links untouched
    #[arg(long, global = true)]
    skip_vulnerabilities: bool,

    /// Actor recorded in log lines of tree updates
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upsert an application tree from a JSON file (`-` for stdin)
    ApplyApplication { input: PathBuf },
    /// Upsert a resource tree from a JSON file (`-` for stdin)
    ApplyResource { input: PathBuf },
    /// Print a persisted application tree as JSON
    ShowApplication { id: String },
    /// Print or change the quick-scan configuration
    QuickScanConfig {
        /// Reset to defaults
        #[arg(long, conflicts_with_all = ["cis_docker_benchmark", "max_scan_parallelism"])]
        set_default: bool,
        #[arg(long)]
        cis_docker_benchmark: Option<bool>,
        #[arg(long)]
        max_scan_parallelism: Option<i64>,
    },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    let mut config = StoreConfig::from_env()?;
    if let Some(path) = cli.db.clone() {
        config.path = Some(path);
    }
    if let Some(driver) = cli.driver.as_deref() {
        config.driver = driver.parse()?;
    }
    if let Some(notice) = ephemeral_store_notice(&config) {
        warn!("event=store_open module=cli status=ephemeral");
        eprintln!("warning: {notice}");
    }
    let conn = open_store(&config)?;

    let params = TransactionParams {
        actor: cli.actor.clone(),
        request_id: Some(format!("cli-{}", std::process::id())),
    };
    let update_vulnerabilities = !cli.skip_vulnerabilities;

    match cli.command {
        Command::ApplyApplication { input } => {
            let mut app: Application = serde_json::from_str(&read_input(&input)?)?;
            let pending = PendingViewRefresh::new();
            let tree = SqliteObjectTree::try_new(&conn, config.driver.clone(), &pending)?;
            tree.set_application(&mut app, &params, update_vulnerabilities)?;
            report_applied("application", &app.id, &pending);
        }
        Command::ApplyResource { input } => {
            let mut resource: Resource = serde_json::from_str(&read_input(&input)?)?;
            let pending = PendingViewRefresh::new();
            let tree = SqliteObjectTree::try_new(&conn, config.driver.clone(), &pending)?;
            tree.set_resource(&mut resource, &params, update_vulnerabilities)?;
            report_applied("resource", &resource.id, &pending);
        }
        Command::ShowApplication { id } => match load_application(&conn, &id)? {
            Some(app) => println!("{}", serde_json::to_string_pretty(&app)?),
            None => return Err(format!("application not found: {id}").into()),
        },
        Command::QuickScanConfig {
            set_default,
            cis_docker_benchmark,
            max_scan_parallelism,
        } => {
            let repo = SqliteQuickScanConfigRepository::new(&conn);
            let config = if set_default {
                repo.set_default()?
            } else if cis_docker_benchmark.is_some() || max_scan_parallelism.is_some() {
                let mut config = match repo.get() {
                    Ok(config) => config,
                    Err(ConfigRepoError::NotFound) => QuickScanConfig::default(),
                    Err(err) => return Err(err.into()),
                };
                if let Some(enabled) = cis_docker_benchmark {
                    config.cis_docker_benchmark_enabled = enabled;
                }
                if let Some(parallelism) = max_scan_parallelism {
                    config.max_scan_parallelism = parallelism;
                }
                repo.set(&config)?;
                config
            } else {
                repo.get()?
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Notice for runs whose writes vanish on exit.
fn ephemeral_store_notice(config: &StoreConfig) -> Option<&'static str> {
    match config.path {
        Some(_) => None,
        None => Some(
            "no --db or SCANTREE_DB_PATH given; using an in-memory store that is discarded on exit",
        ),
    }
}

fn read_input(input: &Path) -> Result<String, Box<dyn Error>> {
    if input == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }
    Ok(std::fs::read_to_string(input)?)
}

fn report_applied(kind: &str, id: &str, pending: &PendingViewRefresh) {
    let tables = pending.drain();
    info!(
        "event=cli_apply module=cli status=ok kind={} id={} changed_tables={}",
        kind,
        id,
        tables.join(",")
    );
    println!("applied {kind} {id}; changed tables: {}", tables.join(", "));
}
