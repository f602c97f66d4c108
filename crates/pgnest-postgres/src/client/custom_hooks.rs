//! Lifecycle hooks for the `deadpool-postgres` connection pool.

use deadpool_postgres::{ClientWrapper, HookError, Metrics};

use crate::TRACING_TARGET_CONNECTION;

/// Custom hook called after a new connection has been established.
///
/// See [`PoolBuilder`] for more details.
///
/// [`PoolBuilder`]: deadpool_postgres::PoolBuilder
pub fn post_create(client: &mut ClientWrapper, metrics: &Metrics) -> Result<(), HookError> {
    let is_closed = client.is_closed();

    tracing::info!(
        target: TRACING_TARGET_CONNECTION,
        hook = "post_create",
        is_closed,
        created_at = ?metrics.created,
        recycle_count = metrics.recycle_count,
        "Connection created and added to pool"
    );

    if is_closed {
        tracing::warn!(
            target: TRACING_TARGET_CONNECTION,
            hook = "post_create",
            "Connection is closed right after creation"
        );
    }

    // Note: should never return an error.
    Ok(())
}

/// Custom hook called after a connection has been recycled.
///
/// See [`PoolBuilder`] for more details.
///
/// [`PoolBuilder`]: deadpool_postgres::PoolBuilder
pub fn post_recycle(client: &mut ClientWrapper, metrics: &Metrics) -> Result<(), HookError> {
    let is_closed = client.is_closed();

    tracing::debug!(
        target: TRACING_TARGET_CONNECTION,
        hook = "post_recycle",
        is_closed,
        created_at = ?metrics.created,
        last_recycled = ?metrics.recycled,
        recycle_count = metrics.recycle_count,
        "Connection recycled"
    );

    if is_closed {
        tracing::error!(
            target: TRACING_TARGET_CONNECTION,
            hook = "post_recycle",
            recycle_count = metrics.recycle_count,
            "Connection is closed after recycling, should be removed from pool"
        );
    }

    // Note: should never return an error.
    Ok(())
}
