use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::transaction::{Checkout, SharedConnection, release, run_transaction};
use super::{Client, Connection, TransactionClient};
use crate::{PgError, PgResult, Query, Row};

/// Client owning one connection checked out of a pool.
///
/// Obtained from [`PoolClient::with_connection`]; the connection goes back
/// when the callback returns. Queries run on that connection in issuance
/// order and [`Client::transaction`] opens a top-level transaction on it.
///
/// [`PoolClient::with_connection`]: super::PoolClient::with_connection
pub struct CheckedOutClient<C: Connection> {
    conn: SharedConnection<C>,
}

impl<C: Connection> CheckedOutClient<C> {
    pub(crate) fn new(conn: C) -> Self {
        Self {
            conn: Checkout::share(conn),
        }
    }

    /// Closes the connection if no other handle refers to it.
    pub(crate) async fn release(self) {
        release(self.conn).await;
    }
}

impl<C: Connection> Clone for CheckedOutClient<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

impl<C: Connection> fmt::Debug for CheckedOutClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckedOutClient").finish_non_exhaustive()
    }
}

impl<C: Connection> Client for CheckedOutClient<C> {
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
        run_transaction(Arc::clone(&self.conn), None, name, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PoolClient;
    use crate::client::mock::{MockProvider, MockState};

    #[tokio::test]
    async fn test_queries_share_one_connection() {
        let state = MockState::default();
        let client = PoolClient::new(MockProvider::new(state.clone()));

        client
            .with_connection(|conn| async move {
                conn.run("select 1").await?;
                conn.run("select 2").await?;
                Ok::<_, PgError>(())
            })
            .await
            .unwrap();

        assert_eq!(state.statements(), ["select 1", "select 2"]);
        assert_eq!(state.acquired(), 1);
        assert_eq!(state.closed(), 1);
    }

    #[tokio::test]
    async fn test_connection_released_on_error() {
        let state = MockState::default();
        state.fail_on("bad", "42601");
        let client = PoolClient::new(MockProvider::new(state.clone()));

        let err = client
            .with_connection(|conn| async move { conn.run("bad").await })
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some("42601"));
        assert_eq!(state.closed(), 1);
    }

    #[tokio::test]
    async fn test_transaction_on_checked_out_connection() {
        let state = MockState::default();
        let client = PoolClient::new(MockProvider::new(state.clone()));

        client
            .with_connection(|conn| async move {
                conn.run("select 0").await?;
                conn.transaction("T", |tx| async move { tx.run("select 1").await })
                    .await
            })
            .await
            .unwrap();

        assert_eq!(state.statements(), ["select 0", "BEGIN", "select 1", "COMMIT"]);
        assert_eq!(state.acquired(), 1);
    }
}
