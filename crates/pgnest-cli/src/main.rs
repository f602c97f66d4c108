#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;

use std::process;

use anyhow::Context;
use pgnest_postgres::{MigrateOptions, PgConfig, migrate, migration_status};

use crate::config::{Cli, Command};

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "pgnest_cli::startup";
pub const TRACING_TARGET_CONFIG: &str = "pgnest_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "pgnest_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_COMMAND,
            error = %format!("{error:#}"),
            "command failed"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    Cli::init_tracing();
    log_startup_info();
    cli.log_config();

    cli.database
        .validate()
        .context("invalid database configuration")?;

    match &cli.command {
        Command::Migrate(args) => run_migrate(&cli.database, args.into()).await,
        Command::Status(args) => run_status(&cli.database, args.into()).await,
    }
}

/// Applies pending migrations.
async fn run_migrate(config: &PgConfig, options: MigrateOptions) -> anyhow::Result<()> {
    let folder = options.folder_location.display().to_string();
    let result = migrate(config, options)
        .await
        .with_context(|| format!("failed to apply migrations from {folder}"))?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        applied = ?result.applied,
        skipped = result.skipped.len(),
        duration_ms = result.duration.as_millis(),
        "migrations applied"
    );

    for name in &result.applied {
        println!("applied  {name}");
    }
    if result.is_no_op() {
        println!("database is up to date");
    }

    Ok(())
}

/// Lists applied and pending migrations.
async fn run_status(config: &PgConfig, options: MigrateOptions) -> anyhow::Result<()> {
    let folder = options.folder_location.display().to_string();
    let status = migration_status(config, options)
        .await
        .with_context(|| format!("failed to read migration status for {folder}"))?;

    for name in &status.applied {
        println!("applied  {name}");
    }
    for name in &status.pending {
        println!("pending  {name}");
    }

    println!(
        "{}/{} migrations applied",
        status.applied_migrations(),
        status.total_migrations()
    );

    Ok(())
}

/// Logs startup information.
fn log_startup_info() {
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        "starting pgnest"
    );

    tracing::debug!(
        target: TRACING_TARGET_STARTUP,
        pid = process::id(),
        features = ?enabled_features(),
        "build information"
    );
}

/// Returns a list of enabled compile-time features.
fn enabled_features() -> Vec<&'static str> {
    [
        cfg!(feature = "tls").then_some("tls"),
        cfg!(feature = "dotenv").then_some("dotenv"),
    ]
    .into_iter()
    .flatten()
    .collect()
}
