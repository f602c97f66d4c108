//! Database migration management.
//!
//! This module applies an ordered folder of SQL migrations to a database
//! exactly once. A run holds a session-level advisory lock on a dedicated
//! connection for its whole duration, so concurrent runs against the same
//! database serialize and later ones observe an up-to-date history.
//!
//! ## Features
//!
//! - **Migration Execution**: Apply pending migrations in file name order
//! - **Drift Detection**: Reject renamed, edited or deleted applied migrations
//! - **Status Monitoring**: Compare the folder against the history table
//! - **Observability**: Structured logging of every step

mod client_ext;
mod disk_migration;
#[cfg(test)]
pub(crate) mod fake;
mod history;
mod migrate_result;
mod run_migration;
mod validate;

use std::path::PathBuf;

pub use client_ext::PoolClientMigrationExt;
pub use disk_migration::{DiskMigration, content_hash};
pub use history::MigrationRecord;
pub use migrate_result::{MigrationResult, MigrationStatus};
pub use run_migration::{Migrator, migrate, migration_status};
use serde::{Deserialize, Serialize};
pub use validate::{ValidationError, validate_state};

use crate::error::SqlError;

/// Key of the advisory lock serializing migration runs.
pub const ADVISORY_LOCK_KEY: i64 = 961_082_034;

/// Where migrations are read from and recorded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateOptions {
    /// Folder holding the `NNN_description.sql` files.
    pub folder_location: PathBuf,
    /// Name of the history table.
    pub table_name: String,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            folder_location: PathBuf::from("migrations"),
            table_name: "schema_migrations".to_owned(),
        }
    }
}

impl MigrateOptions {
    /// Sets the migrations folder.
    pub fn with_folder_location(mut self, folder: impl Into<PathBuf>) -> Self {
        self.folder_location = folder.into();
        self
    }

    /// Sets the history table name.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }
}

/// Failure of a migration run.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Migrations on disk disagree with the history table.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A statement of a migration file failed.
    #[error(
        "Migration {}:{line} failed: [code {}] {message}",
        .path.display(),
        .code.as_deref().unwrap_or("none")
    )]
    Statement {
        path: PathBuf,
        line: usize,
        code: Option<String>,
        message: String,
        #[source]
        source: Box<SqlError>,
    },

    /// The migrations folder or a migration file could not be read.
    #[error("Failed to read migrations from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MigrationError {
    /// Returns the SQLSTATE code of a failed statement.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Statement { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Query;
    use crate::error::DriverError;

    #[test]
    fn test_default_options() {
        let options = MigrateOptions::default();
        assert_eq!(options.folder_location, PathBuf::from("migrations"));
        assert_eq!(options.table_name, "schema_migrations");

        let options = options.with_folder_location("db").with_table_name("history");
        assert_eq!(options.folder_location, PathBuf::from("db"));
        assert_eq!(options.table_name, "history");
    }

    #[test]
    fn test_statement_error_message() {
        let sql = SqlError::new(
            &Query::batch("selec 1"),
            DriverError::new("42601", "syntax error"),
        );
        let err = MigrationError::Statement {
            path: PathBuf::from("migrations/001_a.sql"),
            line: 3,
            code: Some("42601".into()),
            message: "syntax error".into(),
            source: Box::new(sql),
        };

        assert_eq!(
            err.to_string(),
            "Migration migrations/001_a.sql:3 failed: [code 42601] syntax error"
        );
        assert_eq!(err.code(), Some("42601"));
    }
}
