//! [`Connection`] implementations backed by `tokio-postgres`.
//!
//! Batch queries go through the simple query protocol, which accepts several
//! commands in one text. Everything else is prepared, bound from the JSON
//! values and executed with the extended protocol.

use std::pin::pin;

use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, SimpleQueryMessage, Statement};

use super::bind::bind_params;
use super::decode::{decode_row, decode_simple_row};
use super::tls::make_tls_connector;
use super::{Connection, ConnectionProvider, PgConfig, QueryOutput};
use crate::error::DriverError;
use crate::{PgError, PgResult, Query, TRACING_TARGET_CONNECTION};

/// Runs a batch query with the simple query protocol.
async fn simple_query(
    client: &tokio_postgres::Client,
    query: &Query,
) -> Result<QueryOutput, DriverError> {
    if !query.values.is_empty() {
        return Err(DriverError::client("batch queries cannot carry bound values"));
    }

    let mut output = QueryOutput::command(query.command(), 0);
    for message in client.simple_query(&query.text).await? {
        match message {
            SimpleQueryMessage::Row(row) => output.rows.push(decode_simple_row(&row)?),
            SimpleQueryMessage::CommandComplete(rows) => output.rows_affected = rows,
            _ => {}
        }
    }

    Ok(output)
}

/// Binds the values of a query to a prepared statement and runs it.
async fn prepared_query(
    client: &tokio_postgres::Client,
    statement: &Statement,
    query: &Query,
) -> Result<QueryOutput, DriverError> {
    let params = bind_params(&query.values, statement.params())?;
    let stream = client
        .query_raw(
            statement,
            params.iter().map(|param| param.as_ref() as &(dyn ToSql + Sync)),
        )
        .await?;

    let mut stream = pin!(stream);
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await? {
        rows.push(decode_row(&row)?);
    }

    let rows_affected = stream.rows_affected().unwrap_or(rows.len() as u64);
    Ok(QueryOutput {
        command: query.command(),
        rows_affected,
        rows,
    })
}

/// Pooled connections prepare statements through the per-connection cache.
impl Connection for deadpool_postgres::Object {
    async fn query(&mut self, query: &Query) -> Result<QueryOutput, DriverError> {
        if query.batch {
            return simple_query(self, query).await;
        }

        let statement = self.prepare_cached(&query.text).await?;
        prepared_query(self, &statement, query).await
    }

    /// Detaches the connection from the pool, which closes it once dropped.
    fn discard(self) {
        drop(deadpool_postgres::Object::take(self));
    }
}

/// A connection opened outside of any pool.
///
/// Session-level state, such as advisory locks, lives until the connection
/// is closed or dropped.
#[derive(Debug)]
pub struct DedicatedConnection {
    client: tokio_postgres::Client,
    task: JoinHandle<()>,
}

impl DedicatedConnection {
    /// Opens a connection using the given configuration.
    #[tracing::instrument(
        skip(config),
        target = TRACING_TARGET_CONNECTION,
        fields(database = %config.database_url_masked())
    )]
    pub async fn connect(config: &PgConfig) -> PgResult<Self> {
        let pg_config = config.to_tokio_config();
        let connection = match make_tls_connector(config)? {
            Some(tls) => {
                let (client, connection) =
                    pg_config.connect(tls).await.map_err(PgError::Connection)?;
                Self::spawn(client, connection)
            }
            None => {
                let (client, connection) =
                    pg_config.connect(NoTls).await.map_err(PgError::Connection)?;
                Self::spawn(client, connection)
            }
        };

        tracing::debug!(target: TRACING_TARGET_CONNECTION, "Dedicated connection established");
        Ok(connection)
    }

    fn spawn<S, T>(
        client: tokio_postgres::Client,
        connection: tokio_postgres::Connection<S, T>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let task = tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::warn!(
                    target: TRACING_TARGET_CONNECTION,
                    error = %err,
                    "Dedicated connection terminated with an error"
                );
            }
        });

        Self { client, task }
    }
}

impl Connection for DedicatedConnection {
    async fn query(&mut self, query: &Query) -> Result<QueryOutput, DriverError> {
        if query.batch {
            return simple_query(&self.client, query).await;
        }

        let statement = self.client.prepare(&query.text).await?;
        prepared_query(&self.client, &statement, query).await
    }

    async fn close(self) {
        let Self { client, task } = self;
        // Dropping the last client handle terminates the connection task.
        drop(client);
        if let Err(err) = task.await {
            tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                error = %err,
                "Connection task failed"
            );
        }

        tracing::debug!(target: TRACING_TARGET_CONNECTION, "Dedicated connection closed");
    }
}

/// Opens a new [`DedicatedConnection`] for every acquisition.
#[derive(Debug, Clone)]
pub struct DedicatedConnector {
    config: PgConfig,
}

impl DedicatedConnector {
    /// Creates a connector for the given configuration.
    pub fn new(config: PgConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration used to open connections.
    #[inline]
    pub fn config(&self) -> &PgConfig {
        &self.config
    }
}

impl ConnectionProvider for DedicatedConnector {
    type Connection = DedicatedConnection;

    async fn acquire(&self) -> PgResult<DedicatedConnection> {
        DedicatedConnection::connect(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::client::PgPoolClient;
    use crate::{Client, DriverErrorKind};

    /// Server settings from the `PG*` variables, `None` when `PGHOST` is unset.
    fn live_config() -> Option<PgConfig> {
        std::env::var_os("PGHOST")?;
        PgConfig::from_env().ok()
    }

    #[tokio::test]
    async fn test_batch_runs_several_commands() {
        let Some(config) = live_config() else {
            return;
        };
        let mut conn = DedicatedConnection::connect(&config).await.unwrap();

        let output = conn
            .query(&Query::batch(
                "create temporary table batch_t (id int); \
                 insert into batch_t values (1), (2); \
                 select id from batch_t order by id",
            ))
            .await
            .unwrap();

        // The simple protocol returns every value as text.
        let ids: Vec<_> = output.rows.iter().map(|row| row["id"].clone()).collect();
        assert_eq!(ids, [json!("1"), json!("2")]);
        assert_eq!(output.rows_affected, 2);

        let err = conn
            .query(&Query::batch("select 1").bind(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), DriverErrorKind::Client);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_parameterized_query_binds_and_decodes() {
        let Some(config) = live_config() else {
            return;
        };
        let mut conn = DedicatedConnection::connect(&config).await.unwrap();

        let query = Query::new(
            "select $1::int4 + 1 as n, $2::timestamptz as ts, $3::date as d, \
             12.3400::numeric as amount",
        )
        .bind(41)
        .bind("2024-03-01T10:00:00Z")
        .bind("2024-03-01");
        let output = conn.query(&query).await.unwrap();

        let row = &output.rows[0];
        assert_eq!(row["n"], json!(42));
        assert_eq!(row["ts"], json!("2024-03-01T10:00:00Z"));
        assert_eq!(row["d"], json!("2024-03-01"));
        assert_eq!(row["amount"], json!("12.3400"));

        let err = conn.query(&Query::new("selec 1")).await.unwrap_err();
        assert_eq!(err.code(), Some("42601"));
        assert_eq!(err.kind(), DriverErrorKind::Server);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_cancelled_transaction_is_not_reused() {
        let Some(config) = live_config() else {
            return;
        };
        let table = format!("pgnest_cancel_{}", Uuid::new_v4().simple());
        let pool_config = config.clone().with_max_pool_size(1).with_min_pool_size(1);
        let client = PgPoolClient::connect(pool_config).await.unwrap();
        client
            .run(Query::batch(format!("create table {table} (id int)")))
            .await
            .unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(200),
            client.transaction("slow", |tx| async move {
                tx.run("select 1").await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, PgError>(())
            }),
        )
        .await;
        assert!(cancelled.is_err());

        // Same text twice goes through the statement cache of the pooled connection.
        for _ in 0..2 {
            client
                .run(Query::new(format!("insert into {table} values ($1)")).bind(1))
                .await
                .unwrap();
        }

        let mut other = DedicatedConnection::connect(&config).await.unwrap();
        let count = other
            .query(&Query::new(format!("select count(*)::int4 as n from {table}")))
            .await
            .unwrap();
        other
            .query(&Query::batch(format!("drop table {table}")))
            .await
            .unwrap();
        other.close().await;

        assert_eq!(count.rows[0]["n"], json!(2));
    }
}
