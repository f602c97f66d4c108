//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── database: PgConfig      # Connection flags and PG* variables
//! └── command: Command
//!     ├── migrate             # Apply pending migrations
//!     └── status              # List applied and pending migrations
//! ```
//!
//! # Example
//!
//! ```bash
//! pgnest --pg-host db.internal --pg-database app migrate --folder ./migrations
//!
//! # Or via environment variables
//! PGHOST=db.internal PGDATABASE=app pgnest status
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pgnest_postgres::{MigrateOptions, PgConfig};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::TRACING_TARGET_CONFIG;

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "pgnest")]
#[command(about = "Applies ordered SQL migrations to a PostgreSQL database")]
#[command(version)]
pub struct Cli {
    /// Database connection configuration.
    #[clap(flatten)]
    pub database: PgConfig,

    #[command(subcommand)]
    pub command: Command,
}

/// Operation to run against the database.
#[derive(Debug, Clone, Subcommand, Serialize, Deserialize)]
pub enum Command {
    /// Applies every migration that is not recorded yet.
    Migrate(MigrationArgs),
    /// Lists applied and pending migrations without changing the database.
    Status(MigrationArgs),
}

/// Location of the migrations and of their history.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct MigrationArgs {
    /// Folder holding the `NNN_description.sql` files
    #[arg(long, env = "PGNEST_MIGRATIONS", default_value = "migrations")]
    pub folder: PathBuf,

    /// Name of the migration history table
    #[arg(long, env = "PGNEST_MIGRATIONS_TABLE", default_value = "schema_migrations")]
    pub table: String,
}

impl From<&MigrationArgs> for MigrateOptions {
    fn from(args: &MigrationArgs) -> Self {
        MigrateOptions::default()
            .with_folder_location(&args.folder)
            .with_table_name(&args.table)
    }
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    ///
    /// This should be called before parsing CLI arguments so that clap's `env`
    /// feature can pick up values from .env files.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Logs the effective configuration, password masked.
    pub fn log_config(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            database = %self.database.database_url_masked(),
            max_pool_size = self.database.max_pool_size,
            tls = self.database.has_tls_material(),
            "database configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_migrate_command() {
        let cli = Cli::parse_from([
            "pgnest",
            "--pg-host",
            "db.internal",
            "migrate",
            "--folder",
            "db/migrations",
            "--table",
            "history",
        ]);

        assert_eq!(cli.database.host, "db.internal");
        let Command::Migrate(args) = &cli.command else {
            panic!("expected the migrate command");
        };

        let options = MigrateOptions::from(args);
        assert_eq!(options.folder_location, PathBuf::from("db/migrations"));
        assert_eq!(options.table_name, "history");
    }
}
