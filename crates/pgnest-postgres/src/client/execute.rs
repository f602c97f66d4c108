use std::time::Instant;

use super::Connection;
use super::stats::{CounterGuard, client_stats};
use crate::error::SqlError;
use crate::{PgResult, Query, Row, TRACING_TARGET_QUERY};

/// Runs one query on a connection.
///
/// A failure whose SQLSTATE code the query ignores yields an empty result.
/// Any other failure is wrapped into a [`SqlError`].
pub(crate) async fn execute<C: Connection>(conn: &mut C, query: &Query) -> PgResult<Vec<Row>> {
    let started = Instant::now();
    let result = {
        let _queued = CounterGuard::queued_query();
        conn.query(query).await
    };

    let duration = started.elapsed();
    let queued_queries = client_stats().queued_queries;

    match result {
        Ok(output) => {
            tracing::debug!(
                target: TRACING_TARGET_QUERY,
                label = %query.label(),
                command = %output.command,
                rows = output.rows_affected,
                duration_ms = duration.as_millis(),
                queued_queries,
                "Query completed"
            );
            Ok(output.rows)
        }
        Err(err) if query.ignores(err.code()) => {
            tracing::debug!(
                target: TRACING_TARGET_QUERY,
                label = %query.label(),
                code = ?err.code(),
                duration_ms = duration.as_millis(),
                queued_queries,
                "Query failed with an ignored error code"
            );
            Ok(Vec::new())
        }
        Err(err) => {
            tracing::warn!(
                target: TRACING_TARGET_QUERY,
                label = %query.label(),
                code = ?err.code(),
                error = %err,
                duration_ms = duration.as_millis(),
                queued_queries,
                "Query failed"
            );
            Err(SqlError::new(query, err).into())
        }
    }
}
