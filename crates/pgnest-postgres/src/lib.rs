#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging.

/// Tracing target for client-related operations.
///
/// Use this target for logging client initialization, configuration, and lifecycle events.
pub const TRACING_TARGET_CLIENT: &str = "pgnest_postgres::client";

/// Tracing target for database query operations.
///
/// Use this target for logging query execution, results, and query-related errors.
pub const TRACING_TARGET_QUERY: &str = "pgnest_postgres::queries";

/// Tracing target for transaction and savepoint boundaries.
pub const TRACING_TARGET_TRANSACTION: &str = "pgnest_postgres::transactions";

/// Tracing target for database migration operations.
///
/// Use this target for logging migration application, validation, and migration status checks.
pub const TRACING_TARGET_MIGRATION: &str = "pgnest_postgres::migrations";

/// Tracing target for database connection operations.
///
/// Use this target for logging connection establishment, pool management, and connection errors.
pub const TRACING_TARGET_CONNECTION: &str = "pgnest_postgres::connection";

pub mod client;
pub mod migrate;
mod query;
mod sql_files;

use std::borrow::Cow;
use std::path::PathBuf;

use deadpool_postgres::TimeoutType;

pub use crate::client::{
    CheckedOutClient, Client, ClientStats, Connection, ConnectionHeadroom, ConnectionProvider,
    DedicatedConnection, DedicatedConnector, PgConfig, PgPool, PgPoolClient, PgPoolStatus,
    PgServerStats, PoolClient, QueryOutput, TransactionClient, client_stats, pg_stats,
    run_sql_file,
};
pub use crate::migrate::{
    DiskMigration, MigrateOptions, MigrationError, MigrationRecord, MigrationResult,
    MigrationStatus, Migrator, PoolClientMigrationExt, ValidationError, content_hash, migrate,
    migration_status,
};
pub use crate::query::{Query, Row, escape_identifier};
pub use crate::sql_files::{SqlStatement, read_sql_file, read_sql_files_in_dir, split_sql_text};

pub mod error {
    //! Error types and utilities for database operations.
    //!
    //! This module provides the error layers used throughout the crate: the
    //! low-level [`DriverError`] reported by a connection, the descriptive
    //! [`SqlError`] wrapping it with query context, and the crate-wide
    //! [`PgError`].
    //!
    //! [`PgError`]: crate::PgError

    /// Type-erased error type for dynamic error handling.
    pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

    use std::backtrace::Backtrace;
    use std::fmt;
    use std::sync::Arc;

    pub use deadpool_postgres::PoolError as DeadpoolError;
    pub use deadpool_postgres::TimeoutType;

    use crate::Query;

    /// Origin of a [`DriverError`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum DriverErrorKind {
        /// The server rejected the statement with a SQLSTATE code.
        Server,
        /// The connection was lost or already closed.
        Closed,
        /// The statement could not be bound, sent or decoded.
        Client,
    }

    /// Failure reported by the driver for a dispatched statement.
    ///
    /// Carries the SQLSTATE code when the server produced one. Client-side
    /// failures (closed connection, bind errors) have no code and are told
    /// apart by their [`DriverErrorKind`].
    #[derive(Debug, thiserror::Error)]
    #[error("{message}")]
    pub struct DriverError {
        kind: DriverErrorKind,
        code: Option<String>,
        message: String,
        #[source]
        source: Option<BoxError>,
    }

    impl DriverError {
        /// Creates a driver error with a SQLSTATE code.
        pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
            Self {
                kind: DriverErrorKind::Server,
                code: Some(code.into()),
                message: message.into(),
                source: None,
            }
        }

        /// Creates a client-side error that has no SQLSTATE code.
        pub fn client(message: impl Into<String>) -> Self {
            Self {
                kind: DriverErrorKind::Client,
                code: None,
                message: message.into(),
                source: None,
            }
        }

        /// Creates an error for a connection that is no longer usable.
        pub fn closed(message: impl Into<String>) -> Self {
            Self {
                kind: DriverErrorKind::Closed,
                code: None,
                message: message.into(),
                source: None,
            }
        }

        /// Returns where the error originated.
        #[inline]
        pub fn kind(&self) -> DriverErrorKind {
            self.kind
        }

        /// Returns the SQLSTATE code, if the server reported one.
        #[inline]
        pub fn code(&self) -> Option<&str> {
            self.code.as_deref()
        }

        /// Returns the primary error message.
        #[inline]
        pub fn message(&self) -> &str {
            &self.message
        }
    }

    impl From<tokio_postgres::Error> for DriverError {
        fn from(error: tokio_postgres::Error) -> Self {
            let code = error.code().map(|state| state.code().to_owned());
            let message = match error.as_db_error() {
                Some(db_error) => db_error.message().to_owned(),
                None => error.to_string(),
            };

            let lost_io =
                std::error::Error::source(&error).is_some_and(|s| s.is::<std::io::Error>());
            let kind = if code.is_some() {
                DriverErrorKind::Server
            } else if error.is_closed() || lost_io {
                DriverErrorKind::Closed
            } else {
                DriverErrorKind::Client
            };

            Self {
                kind,
                code,
                message,
                source: Some(Box::new(error)),
            }
        }
    }

    /// Descriptive query failure.
    ///
    /// Keeps the offending query text, the bound values (each stringified as
    /// JSON) and the backtrace of the call site next to the [`DriverError`]
    /// that caused it, which stays reachable through [`source`].
    ///
    /// [`source`]: std::error::Error::source
    #[derive(Debug, thiserror::Error)]
    pub struct SqlError {
        label: String,
        text: String,
        values: Vec<String>,
        #[source]
        source: DriverError,
        trace: Arc<Backtrace>,
    }

    impl SqlError {
        /// Wraps a driver error with the context of the query that caused it.
        pub fn new(query: &Query, source: DriverError) -> Self {
            let values = query
                .values
                .iter()
                .map(|value| serde_json::to_string(value).unwrap_or_else(|_| value.to_string()))
                .collect();

            Self {
                label: query.label(),
                text: query.text.clone(),
                values,
                source,
                trace: Arc::new(Backtrace::capture()),
            }
        }

        /// Returns the SQLSTATE code reported by the server.
        #[inline]
        pub fn code(&self) -> Option<&str> {
            self.source.code()
        }

        /// Returns the server message.
        #[inline]
        pub fn message(&self) -> &str {
            self.source.message()
        }

        /// Returns the text of the failed query.
        #[inline]
        pub fn query_text(&self) -> &str {
            &self.text
        }

        /// Returns the stringified bound values, in placeholder order.
        #[inline]
        pub fn values(&self) -> &[String] {
            &self.values
        }

        /// Returns the driver error underneath this one.
        #[inline]
        pub fn driver_error(&self) -> &DriverError {
            &self.source
        }

        /// Returns the backtrace captured where the query was issued.
        #[inline]
        pub fn backtrace(&self) -> &Backtrace {
            &self.trace
        }
    }

    impl fmt::Display for SqlError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{} [errcode: {}] {}\nQuery: {}\nValues:",
                self.label,
                self.code().unwrap_or("none"),
                self.message(),
                self.text
            )?;

            for (i, value) in self.values.iter().enumerate() {
                write!(f, "\n  ${}= {}", i + 1, value)?;
            }

            Ok(())
        }
    }
}

pub use crate::error::{DriverError, DriverErrorKind, SqlError};

/// Comprehensive error type for all PostgreSQL database operations.
///
/// This enum covers all possible error conditions that can occur when working
/// with the database, including connection issues, query failures, timeouts,
/// and migration problems.
#[derive(Debug, thiserror::Error)]
#[must_use = "database errors should be handled appropriately"]
pub enum PgError {
    /// Configuration error.
    ///
    /// This includes invalid configuration parameters, missing required settings,
    /// unreadable TLS material or other issues related to the database configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database operation timed out.
    ///
    /// This can occur during connection creation, waiting for available connections,
    /// or connection recycling operations.
    #[error("Database operation timed out: {0:?}")]
    Timeout(TimeoutType),

    /// Failed to establish or maintain a database connection.
    #[error("Database connection error: {0}")]
    Connection(#[source] tokio_postgres::Error),

    /// Database query execution failed.
    ///
    /// The boxed [`SqlError`] carries the SQLSTATE code, the query and its values.
    #[error(transparent)]
    Sql(#[from] Box<SqlError>),

    /// Database migration operation failed.
    #[error(transparent)]
    Migration(#[from] migrate::MigrationError),

    /// Reading a SQL file failed.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected error occurred.
    ///
    /// This can occur when an error is encountered that is not covered by the
    /// other error types.
    #[error("Unexpected error: {0}")]
    Unexpected(Cow<'static, str>),
}

impl PgError {
    /// Returns the SQLSTATE code if this error is a query failure.
    pub fn code(&self) -> Option<&str> {
        match self {
            PgError::Sql(err) => err.code(),
            _ => None,
        }
    }

    /// Returns whether this error indicates a transient failure that might succeed on retry.
    ///
    /// Transient errors include timeouts and lost connections. Errors
    /// reported by the server and client-side bind or decode failures are
    /// permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            PgError::Timeout(_) | PgError::Connection(_) => true,
            PgError::Sql(err) => err.driver_error().kind() == DriverErrorKind::Closed,
            _ => false,
        }
    }

    /// Returns whether this error indicates a permanent failure that won't succeed on retry.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl From<SqlError> for PgError {
    fn from(value: SqlError) -> Self {
        Self::Sql(Box::new(value))
    }
}

impl From<error::DeadpoolError> for PgError {
    fn from(value: error::DeadpoolError) -> Self {
        use error::DeadpoolError;

        match value {
            DeadpoolError::Timeout(timeout) => Self::Timeout(timeout),
            DeadpoolError::Backend(error) => Self::Connection(error),
            DeadpoolError::PostCreateHook(err) => {
                // Our hooks never fail, but handle gracefully:
                tracing::warn!(
                    target: TRACING_TARGET_CONNECTION,
                    error = %err,
                    "Unexpected post-create hook error"
                );
                Self::Unexpected(err.to_string().into())
            }
            DeadpoolError::NoRuntimeSpecified => {
                tracing::error!(
                    target: TRACING_TARGET_CONNECTION,
                    "No tokio runtime specified for connection pool"
                );
                Self::Unexpected("No runtime specified".into())
            }
            DeadpoolError::Closed => Self::Unexpected("Connection pool is closed".into()),
        }
    }
}

/// Specialized [`Result`] type for database operations.
///
/// This is a convenience alias that uses [`PgError`] as the error type,
/// making database operation signatures cleaner and more consistent.
pub type PgResult<T, E = PgError> = Result<T, E>;
