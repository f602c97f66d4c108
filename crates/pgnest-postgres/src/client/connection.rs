//! Capabilities a database driver has to provide.

use std::future::Future;

use crate::error::DriverError;
use crate::{PgResult, Query, Row};

/// Outcome of one dispatched statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Leading keyword of the statement (`SELECT`, `INSERT`, ...).
    pub command: String,
    /// Number of rows returned or affected.
    pub rows_affected: u64,
    /// Decoded result rows.
    pub rows: Vec<Row>,
}

impl QueryOutput {
    /// Creates an output for a statement that returned no rows.
    pub fn command(command: impl Into<String>, rows_affected: u64) -> Self {
        Self {
            command: command.into(),
            rows_affected,
            rows: Vec::new(),
        }
    }

    /// Creates an output carrying result rows.
    pub fn rows(command: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            command: command.into(),
            rows_affected: rows.len() as u64,
            rows,
        }
    }
}

/// One physical connection.
///
/// Statements issued on a connection execute in issuance order. A
/// connection is used by one logical thread of control at a time, which
/// `&mut self` enforces.
pub trait Connection: Send + 'static {
    /// Dispatches one query and waits for its result.
    fn query(
        &mut self,
        query: &Query,
    ) -> impl Future<Output = Result<QueryOutput, DriverError>> + Send;

    /// Closes the connection, releasing every session-level resource it holds.
    ///
    /// Dropping a connection has the same effect without waiting for it.
    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async move { drop(self) }
    }

    /// Drops the connection without handing it back to its provider.
    ///
    /// Used when the connection may still be inside an open transaction.
    fn discard(self)
    where
        Self: Sized,
    {
        drop(self)
    }
}

/// Source of physical connections, such as a pool or a connector.
pub trait ConnectionProvider: Send + Sync {
    /// Connection handed out by this provider.
    type Connection: Connection;

    /// Acquires a connection for exclusive use.
    ///
    /// For pools the connection goes back to the pool when dropped.
    fn acquire(&self) -> impl Future<Output = PgResult<Self::Connection>> + Send;
}
