//! Transactions and savepoints over one shared connection.
//!
//! The first `transaction` call on a connection issues `BEGIN`, `COMMIT` and
//! `ROLLBACK`. Calls made through the resulting [`TransactionClient`] are
//! nested and issue `SAVEPOINT`, `RELEASE SAVEPOINT` and
//! `ROLLBACK TO SAVEPOINT` instead. Savepoints are named after the lower-cased
//! transaction name; reusing a name among open savepoints is not detected.
//!
//! A connection whose top-level transaction was not closed, because the
//! transaction future was dropped or `ROLLBACK` failed, is discarded instead
//! of being handed back to its provider.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::execute::execute;
use super::stats::{CounterGuard, client_stats};
use super::{Client, Connection};
use crate::error::{DriverError, SqlError};
use crate::{PgError, PgResult, Query, Row, TRACING_TARGET_TRANSACTION, escape_identifier};

/// A connection shared between the handles of one checkout.
pub(crate) type SharedConnection<C> = Arc<Mutex<Checkout<C>>>;

/// One checked-out connection and whether a top-level transaction is open on it.
pub(crate) struct Checkout<C: Connection> {
    conn: Option<C>,
    in_transaction: bool,
}

impl<C: Connection> Checkout<C> {
    /// Wraps a freshly acquired connection for sharing between handles.
    pub(crate) fn share(conn: C) -> SharedConnection<C> {
        Arc::new(Mutex::new(Self {
            conn: Some(conn),
            in_transaction: false,
        }))
    }

    /// Runs one query on the connection.
    pub(crate) async fn query(&mut self, query: &Query) -> PgResult<Vec<Row>> {
        match self.conn.as_mut() {
            Some(conn) => execute(conn, query).await,
            None => {
                let err = DriverError::closed("connection was already released");
                Err(SqlError::new(query, err).into())
            }
        }
    }

    /// Hands the connection back, or discards it while a transaction is open.
    async fn close(mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.in_transaction {
            discard(conn);
        } else {
            conn.close().await;
        }
    }
}

impl<C: Connection> Drop for Checkout<C> {
    fn drop(&mut self) {
        if self.in_transaction
            && let Some(conn) = self.conn.take()
        {
            discard(conn);
        }
    }
}

fn discard<C: Connection>(conn: C) {
    tracing::warn!(
        target: TRACING_TARGET_TRANSACTION,
        "Transaction was left open, discarding its connection"
    );
    conn.discard();
}

/// Identity of one open transaction or savepoint.
#[derive(Debug)]
pub(crate) struct TransactionContext {
    id: Uuid,
    name: String,
    depth: usize,
}

/// Client bound to an open transaction.
///
/// Queries run inside the transaction. Calling [`Client::transaction`] on it
/// opens a savepoint on the same connection. Clones share the connection and
/// the transaction.
pub struct TransactionClient<C: Connection> {
    conn: SharedConnection<C>,
    context: Arc<TransactionContext>,
}

impl<C: Connection> TransactionClient<C> {
    /// Returns the id shared by a top-level transaction and its savepoints.
    #[inline]
    pub fn id(&self) -> Uuid {
        self.context.id
    }

    /// Returns the name this transaction was opened with.
    #[inline]
    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// Returns the nesting depth, `0` for the top-level transaction.
    #[inline]
    pub fn depth(&self) -> usize {
        self.context.depth
    }
}

impl<C: Connection> Clone for TransactionClient<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            context: Arc::clone(&self.context),
        }
    }
}

impl<C: Connection> fmt::Debug for TransactionClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionClient")
            .field("id", &self.context.id)
            .field("name", &self.context.name)
            .field("depth", &self.context.depth)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Client for TransactionClient<C> {
    type Connection = C;

    fn run(
        &self,
        query: impl Into<Query> + Send,
    ) -> impl Future<Output = PgResult<Vec<Row>>> + Send {
        let query = query.into();
        async move { self.conn.lock().await.query(&query).await }
    }

    fn transaction<T, E, F, Fut>(
        &self,
        name: &str,
        body: F,
    ) -> impl Future<Output = Result<T, E>> + Send
    where
        F: FnOnce(TransactionClient<Self::Connection>) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<PgError> + Send,
    {
        run_transaction(
            Arc::clone(&self.conn),
            Some(Arc::clone(&self.context)),
            name,
            body,
        )
    }
}

/// Statements delimiting a transaction or a savepoint.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Boundary {
    Transaction,
    Savepoint(String),
}

impl Boundary {
    fn is_top_level(&self) -> bool {
        matches!(self, Self::Transaction)
    }

    fn begin(&self) -> String {
        match self {
            Self::Transaction => "BEGIN".to_owned(),
            Self::Savepoint(name) => format!("SAVEPOINT {name}"),
        }
    }

    fn commit(&self) -> String {
        match self {
            Self::Transaction => "COMMIT".to_owned(),
            Self::Savepoint(name) => format!("RELEASE SAVEPOINT {name}"),
        }
    }

    fn rollback(&self) -> String {
        match self {
            Self::Transaction => "ROLLBACK".to_owned(),
            Self::Savepoint(name) => format!("ROLLBACK TO SAVEPOINT {name}"),
        }
    }
}

/// Runs `body` inside a transaction, or a savepoint when `parent` is set.
///
/// A failing body is followed by one rollback attempt and its error is
/// returned unchanged. A failing commit is followed by a rollback attempt
/// and the commit error is returned. Rollback failures are only logged.
pub(crate) async fn run_transaction<C, T, E, F, Fut>(
    conn: SharedConnection<C>,
    parent: Option<Arc<TransactionContext>>,
    name: &str,
    body: F,
) -> Result<T, E>
where
    C: Connection,
    F: FnOnce(TransactionClient<C>) -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: From<PgError> + Send,
{
    let (id, depth, boundary) = match &parent {
        None => (Uuid::new_v4(), 0, Boundary::Transaction),
        Some(parent) => {
            let savepoint = escape_identifier(&name.to_lowercase()).map_err(E::from)?;
            (parent.id, parent.depth + 1, Boundary::Savepoint(savepoint))
        }
    };

    let context = Arc::new(TransactionContext {
        id,
        name: name.to_owned(),
        depth,
    });

    let span = tracing::info_span!(
        target: TRACING_TARGET_TRANSACTION,
        "transaction",
        name = %context.name,
        txn_id = %context.id,
        depth,
    );

    async move {
        let _active = (depth == 0).then(CounterGuard::active_transaction);
        let started = Instant::now();

        tracing::debug!(
            target: TRACING_TARGET_TRANSACTION,
            active_transactions = client_stats().active_transactions,
            "Starting transaction"
        );

        begin(&conn, &boundary).await.map_err(E::from)?;

        let client = TransactionClient {
            conn: Arc::clone(&conn),
            context,
        };

        match body(client).await {
            Ok(value) => match commit(&conn, &boundary).await {
                Ok(()) => {
                    tracing::debug!(
                        target: TRACING_TARGET_TRANSACTION,
                        duration_ms = started.elapsed().as_millis(),
                        active_transactions = client_stats().active_transactions,
                        "Transaction committed"
                    );
                    Ok(value)
                }
                Err(err) => {
                    tracing::warn!(
                        target: TRACING_TARGET_TRANSACTION,
                        error = %err,
                        duration_ms = started.elapsed().as_millis(),
                        "Transaction commit failed"
                    );
                    rollback(&conn, &boundary).await;
                    Err(E::from(err))
                }
            },
            Err(err) => {
                tracing::debug!(
                    target: TRACING_TARGET_TRANSACTION,
                    duration_ms = started.elapsed().as_millis(),
                    active_transactions = client_stats().active_transactions,
                    "Transaction body failed, rolling back"
                );
                rollback(&conn, &boundary).await;
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

/// Marks the connection as inside a transaction before `BEGIN` is sent, so a
/// cancelled `BEGIN` still discards it.
async fn begin<C: Connection>(conn: &SharedConnection<C>, boundary: &Boundary) -> PgResult<()> {
    let mut checkout = conn.lock().await;
    if boundary.is_top_level() {
        checkout.in_transaction = true;
    }

    checkout.query(&Query::batch(boundary.begin())).await?;
    Ok(())
}

/// Runs a closing statement and clears the mark once it succeeds.
async fn close_boundary<C: Connection>(
    conn: &SharedConnection<C>,
    boundary: &Boundary,
    text: String,
) -> PgResult<()> {
    let mut checkout = conn.lock().await;
    checkout.query(&Query::batch(text)).await?;
    if boundary.is_top_level() {
        checkout.in_transaction = false;
    }

    Ok(())
}

async fn commit<C: Connection>(conn: &SharedConnection<C>, boundary: &Boundary) -> PgResult<()> {
    close_boundary(conn, boundary, boundary.commit()).await
}

async fn rollback<C: Connection>(conn: &SharedConnection<C>, boundary: &Boundary) {
    if let Err(err) = close_boundary(conn, boundary, boundary.rollback()).await {
        tracing::error!(
            target: TRACING_TARGET_TRANSACTION,
            error = %err,
            "Additional error occurred while rolling back"
        );
    }
}

/// Closes a connection once its last handle is gone.
pub(crate) async fn release<C: Connection>(conn: SharedConnection<C>) {
    match Arc::try_unwrap(conn) {
        Ok(checkout) => checkout.into_inner().close().await,
        Err(_) => {
            tracing::warn!(
                target: TRACING_TARGET_TRANSACTION,
                "Client handle outlived its scope, connection is released when it drops"
            );
        }
    }
}
