use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ct_cli::commands::{call_log, marker, replay, status};
use ct_cli::{CallLogAction, Cli, Commands, Config, MarkerAction};
use ct_core::CallLogRow;

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(ct_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = ct_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // try_init: tests may have installed a subscriber already
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut stdout = std::io::stdout().lock();
    match &cli.command {
        Some(Commands::Replay { script }) => {
            let text = std::fs::read_to_string(script)
                .with_context(|| format!("failed to read {}", script.display()))?;
            let steps = replay::parse_script(&text)?;
            let (db, config) = open_database(cli.config.as_deref())?;
            replay::run(&mut stdout, db, &config.correlation, &steps)?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &db, &config.database_path)?;
        }
        Some(Commands::CallLog(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            match action {
                CallLogAction::Add {
                    number,
                    call_type,
                    duration,
                    at,
                } => {
                    let row = CallLogRow {
                        number: number.clone(),
                        call_type: *call_type,
                        timestamp: at.unwrap_or_else(Utc::now),
                        duration_seconds: *duration,
                    };
                    call_log::add(&mut stdout, &mut db, &row)?;
                }
                CallLogAction::List { limit } => call_log::list(&mut stdout, &db, *limit)?,
            }
        }
        Some(Commands::Marker(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            match action {
                MarkerAction::Set { number } => {
                    marker::set(&mut stdout, &mut db, number, Utc::now())?;
                }
                MarkerAction::Clear => marker::clear(&mut stdout, &mut db)?,
            }
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}
