//! Process-wide counters and server-side connection statistics.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::Client;
use crate::{PgResult, Query, Row};

static ACTIVE_TRANSACTIONS: AtomicUsize = AtomicUsize::new(0);
static QUEUED_QUERIES: AtomicUsize = AtomicUsize::new(0);

/// Snapshot of the process-wide client counters.
///
/// The counters are for logging only and never influence control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    /// Top-level transactions currently open.
    pub active_transactions: usize,
    /// Queries dispatched and waiting for the driver.
    pub queued_queries: usize,
}

/// Returns the current value of the process-wide counters.
pub fn client_stats() -> ClientStats {
    ClientStats {
        active_transactions: ACTIVE_TRANSACTIONS.load(Ordering::Relaxed),
        queued_queries: QUEUED_QUERIES.load(Ordering::Relaxed),
    }
}

/// Increments a counter for as long as the guard lives.
#[derive(Debug)]
pub(crate) struct CounterGuard(&'static AtomicUsize);

impl CounterGuard {
    pub(crate) fn active_transaction() -> Self {
        Self::increment(&ACTIVE_TRANSACTIONS)
    }

    pub(crate) fn queued_query() -> Self {
        Self::increment(&QUEUED_QUERIES)
    }

    fn increment(counter: &'static AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Connection headroom of the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHeadroom {
    /// `max_connections` setting.
    pub max_conn: i64,
    /// Backends currently connected.
    pub used: i64,
    /// `superuser_reserved_connections` setting.
    pub res_for_super: i64,
    /// Connections still available to normal users.
    pub res_for_normal: i64,
}

/// Server-side connection statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PgServerStats {
    /// The `max_connections` row of `pg_settings`.
    pub max_connections: Vec<Row>,
    /// `pg_stat_activity` rows of the current database.
    pub stat_activity: Vec<Row>,
    /// `pg_stat_database` rows of the current database.
    pub stat_database: Vec<Row>,
    /// Backends connected across all databases.
    pub total_backends: i64,
    /// Connection headroom summary.
    pub headroom: ConnectionHeadroom,
}

const HEADROOM_QUERY: &str = "\
select max_conn, used, res_for_super, (max_conn - used - res_for_super) as res_for_normal
from (select count(*)::int8 as used from pg_stat_activity) t1,
     (select setting::int8 as res_for_super from pg_settings
       where name = 'superuser_reserved_connections') t2,
     (select setting::int8 as max_conn from pg_settings where name = 'max_connections') t3";

/// Collects connection statistics from the server.
pub async fn pg_stats<C: Client>(client: &C) -> PgResult<PgServerStats> {
    let max_connections = client
        .run(
            Query::new("select * from pg_settings where name = 'max_connections'")
                .with_name("pg-stats-max-connections"),
        )
        .await?;
    let stat_activity = client
        .run(
            Query::new("select * from pg_stat_activity where datname = current_database()")
                .with_name("pg-stats-activity"),
        )
        .await?;
    let stat_database = client
        .run(
            Query::new("select * from pg_stat_database where datname = current_database()")
                .with_name("pg-stats-database"),
        )
        .await?;
    let backends = client
        .run(
            Query::new("select coalesce(sum(numbackends), 0)::int8 as total from pg_stat_database")
                .with_name("pg-stats-backends"),
        )
        .await?;
    let headroom = client
        .run(Query::new(HEADROOM_QUERY).with_name("pg-stats-headroom"))
        .await?;

    let headroom = headroom
        .first()
        .map(|row| ConnectionHeadroom {
            max_conn: int_column(row, "max_conn"),
            used: int_column(row, "used"),
            res_for_super: int_column(row, "res_for_super"),
            res_for_normal: int_column(row, "res_for_normal"),
        })
        .unwrap_or_default();

    Ok(PgServerStats {
        max_connections,
        stat_activity,
        stat_database,
        total_backends: backends.first().map_or(0, |row| int_column(row, "total")),
        headroom,
    })
}

/// Reads an integer column, accepting numbers and numeric strings.
fn int_column(row: &Row, column: &str) -> i64 {
    match row.get(column) {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(JsonValue::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}
