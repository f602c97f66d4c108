use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use deadpool_postgres::{Hook, Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use futures::future::try_join_all;
use tokio_postgres::NoTls;

use super::checked_out::CheckedOutClient;
use super::execute::execute;
use super::tls::make_tls_connector;
use super::transaction::{Checkout, release, run_transaction};
use super::{Client, Connection, ConnectionProvider, PgConfig, TransactionClient, custom_hooks};
use crate::{PgError, PgResult, Query, Row, TRACING_TARGET_CONNECTION};

/// Connection pool status information.
#[derive(Debug, Clone)]
pub struct PgPoolStatus {
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Current number of connections in the pool
    pub size: usize,
    /// Number of available connections
    pub available: usize,
    /// Number of requests waiting for connections
    pub waiting: usize,
}

impl PgPoolStatus {
    /// Returns the utilization percentage of the pool (0.0 to 1.0).
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.size.saturating_sub(self.available) as f64 / self.max_size as f64
        }
    }

    /// Returns whether the pool is under pressure (high utilization or waiting requests).
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.waiting > 0 || self.utilization() > 0.8
    }
}

/// A `deadpool` pool of `tokio-postgres` connections with its configuration.
#[derive(Clone)]
pub struct PgPool {
    pool: Pool,
    config: Arc<PgConfig>,
}

impl PgPool {
    /// Builds a pool from the configuration without opening any connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or its TLS material
    /// cannot be loaded.
    #[tracing::instrument(
        skip(config),
        target = TRACING_TARGET_CONNECTION,
        fields(database = %config.database_url_masked())
    )]
    pub fn new(config: PgConfig) -> PgResult<Self> {
        tracing::info!(target: TRACING_TARGET_CONNECTION, "Initializing connection pool");
        config.validate()?;

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pg_config = config.to_tokio_config();
        let manager = match make_tls_connector(&config)? {
            Some(tls) => Manager::from_config(pg_config, tls, manager_config),
            None => Manager::from_config(pg_config, NoTls, manager_config),
        };

        let pool = Pool::builder(manager)
            .max_size(config.max_pool_size)
            .wait_timeout(config.connection_timeout())
            .create_timeout(config.connection_timeout())
            .recycle_timeout(config.idle_timeout())
            .runtime(Runtime::Tokio1)
            .post_create(Hook::sync_fn(custom_hooks::post_create))
            .post_recycle(Hook::sync_fn(custom_hooks::post_recycle))
            .build()
            .map_err(|e| {
                tracing::error!(
                    target: TRACING_TARGET_CONNECTION,
                    error = %e,
                    "Failed to create connection pool"
                );
                PgError::Unexpected(format!("Failed to build connection pool: {}", e).into())
            })?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Returns the configuration the pool was built with.
    #[inline]
    pub fn config(&self) -> &PgConfig {
        &self.config
    }
}

impl ConnectionProvider for PgPool {
    type Connection = deadpool_postgres::Object;

    async fn acquire(&self) -> PgResult<deadpool_postgres::Object> {
        tracing::debug!(target: TRACING_TARGET_CONNECTION, "Acquiring connection from pool");

        let start = Instant::now();
        let conn = self.pool.get().await.map_err(|e| {
            tracing::error!(
                target: TRACING_TARGET_CONNECTION,
                error = %e,
                elapsed = ?start.elapsed(),
                "Failed to acquire connection from pool"
            );
            PgError::from(e)
        })?;

        let elapsed = start.elapsed();
        if elapsed > Duration::from_millis(100) {
            tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                elapsed = ?elapsed,
                "Connection acquisition took longer than expected"
            );
        }

        Ok(conn)
    }
}

impl fmt::Debug for PgPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PgPool")
            .field("database_url", &self.config.database_url_masked())
            .field("max_size", &status.max_size)
            .field("size", &status.size)
            .field("available", &status.available)
            .field("waiting", &status.waiting)
            .finish()
    }
}

/// Client backed by a connection provider, usually a pool.
///
/// Every [`run`] checks out a connection for one query. Every
/// [`transaction`] checks out a connection for the whole transaction and
/// releases it when the transaction ends, whatever the outcome.
///
/// [`run`]: Client::run
/// [`transaction`]: Client::transaction
pub struct PoolClient<P> {
    provider: Arc<P>,
}

/// Pool client over a `deadpool-postgres` pool.
pub type PgPoolClient = PoolClient<PgPool>;

impl<P: ConnectionProvider> PoolClient<P> {
    /// Creates a client over a connection provider.
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    /// Returns the underlying connection provider.
    #[inline]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs `body` with one connection checked out for its whole duration.
    ///
    /// The connection is released when `body` completes, on success and on
    /// failure alike.
    pub async fn with_connection<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(CheckedOutClient<P::Connection>) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: From<PgError>,
    {
        let conn = self.provider.acquire().await.map_err(E::from)?;
        let client = CheckedOutClient::new(conn);
        let result = body(client.clone()).await;
        client.release().await;
        result
    }
}

impl PoolClient<PgPool> {
    /// Builds the pool, opens `min_pool_size` connections and checks that
    /// the server answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a connection cannot
    /// be established or the connectivity test fails.
    #[tracing::instrument(
        skip(config),
        target = TRACING_TARGET_CONNECTION,
        fields(database = %config.database_url_masked())
    )]
    pub async fn connect(config: PgConfig) -> PgResult<Self> {
        let pool = PgPool::new(config)?;
        let min_pool_size = pool.config().min_pool_size;

        tracing::debug!(
            target: TRACING_TARGET_CONNECTION,
            min_pool_size,
            "Opening initial connections"
        );
        let mut warm = try_join_all((0..min_pool_size.max(1)).map(|_| pool.acquire())).await?;

        tracing::debug!(target: TRACING_TARGET_CONNECTION, "Testing database connectivity");
        if let Some(conn) = warm.first_mut() {
            execute(conn, &Query::new("SELECT 1").with_name("connectivity-test")).await?;
        }
        drop(warm);

        let this = Self::new(pool);
        let status = this.pool_status();
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            max_size = status.max_size,
            size = status.size,
            "Database client initialized successfully"
        );

        Ok(this)
    }

    /// Gets the current pool status and statistics.
    #[inline]
    pub fn pool_status(&self) -> PgPoolStatus {
        let status = self.provider.pool.status();
        PgPoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Gets the database configuration used by this client.
    #[inline]
    pub fn config(&self) -> &PgConfig {
        self.provider.config()
    }
}

impl<P> Clone for PoolClient<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for PoolClient<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolClient")
            .field("provider", &self.provider)
            .finish()
    }
}

impl<P: ConnectionProvider> Client for PoolClient<P> {
    type Connection = P::Connection;

    fn run(
        &self,
        query: impl Into<Query> + Send,
    ) -> impl Future<Output = PgResult<Vec<Row>>> + Send {
        let query = query.into();
        async move {
            let mut conn = self.provider.acquire().await?;
            let result = execute(&mut conn, &query).await;
            conn.close().await;
            result
        }
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
        async move {
            let conn = self.provider.acquire().await.map_err(E::from)?;
            let conn = Checkout::share(conn);
            let result = run_transaction(Arc::clone(&conn), None, name, body).await;
            release(conn).await;
            result
        }
    }
}
