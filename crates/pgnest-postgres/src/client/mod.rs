//! PostgreSQL clients with connection pooling and nested transactions.
//!
//! Three client variants share the [`Client`] contract:
//!
//! - [`PoolClient`] holds a connection provider and checks out a connection
//!   per query or per transaction,
//! - [`CheckedOutClient`] owns one connection for the duration of a callback,
//! - [`TransactionClient`] wraps the connection of an open transaction and
//!   turns further `transaction` calls into savepoints.

mod bind;
mod checked_out;
mod connection;
pub(crate) mod custom_hooks;
mod decode;
mod driver;
pub(crate) mod execute;
#[cfg(test)]
pub(crate) mod mock;
mod pg_config;
mod pool_client;
mod stats;
mod tls;
mod transaction;

use std::future::Future;
use std::path::Path;

pub use checked_out::CheckedOutClient;
pub use connection::{Connection, ConnectionProvider, QueryOutput};
pub use driver::{DedicatedConnection, DedicatedConnector};
pub use pg_config::PgConfig;
pub use pool_client::{PgPool, PgPoolClient, PgPoolStatus, PoolClient};
pub use stats::{ClientStats, ConnectionHeadroom, PgServerStats, client_stats, pg_stats};
pub use transaction::TransactionClient;

use crate::{PgError, PgResult, Query, Row, TRACING_TARGET_CLIENT, read_sql_file};

/// Contract shared by every client variant.
///
/// # Example
///
/// ```rust,no_run
/// use pgnest_postgres::{Client, PgConfig, PgError, PgPoolClient, Query};
///
/// # async fn example() -> Result<(), PgError> {
/// let client = PgPoolClient::connect(PgConfig::from_env()?).await?;
///
/// let id = client
///     .transaction("create-user", |tx| async move {
///         let rows = tx
///             .run(Query::new("insert into users (name) values ($1) returning id").bind("ada"))
///             .await?;
///
///         // Opens a savepoint on the same connection.
///         tx.transaction("audit", |tx| async move {
///             tx.run(Query::new("insert into audit (event) values ($1)").bind("user-created"))
///                 .await
///         })
///         .await?;
///
///         Ok::<_, PgError>(rows[0]["id"].clone())
///     })
///     .await?;
/// # let _ = id;
/// # Ok(())
/// # }
/// ```
pub trait Client: Send + Sync {
    /// Connection the transactions of this client run on.
    type Connection: Connection;

    /// Runs one query and returns its rows.
    ///
    /// A failure whose SQLSTATE code is listed in the query's ignored codes
    /// yields an empty result instead of an error.
    fn run(
        &self,
        query: impl Into<Query> + Send,
    ) -> impl Future<Output = PgResult<Vec<Row>>> + Send;

    /// Runs `body` inside a named transaction.
    ///
    /// Opens a top-level transaction, or a savepoint when called on a
    /// [`TransactionClient`]. The transaction is committed when `body`
    /// succeeds and rolled back when it fails; the error of `body` is
    /// returned as is.
    fn transaction<T, E, F, Fut>(
        &self,
        name: &str,
        body: F,
    ) -> impl Future<Output = Result<T, E>> + Send
    where
        F: FnOnce(TransactionClient<Self::Connection>) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<PgError> + Send;
}

/// Reads a SQL file and runs its statements one after another.
///
/// Statements honour their `-- ignore-error:` directives.
pub async fn run_sql_file<C: Client>(client: &C, path: impl AsRef<Path>) -> PgResult<()> {
    let path = path.as_ref();
    let queries = read_sql_file(path)?;

    tracing::debug!(
        target: TRACING_TARGET_CLIENT,
        path = %path.display(),
        statements = queries.len(),
        "Running SQL file"
    );

    for query in queries {
        client.run(query).await?;
    }

    Ok(())
}
