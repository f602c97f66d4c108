//! The migration history table.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::client::Connection;
use crate::client::execute::execute;
use crate::{PgError, PgResult, Query, Row, escape_identifier};

/// SQLSTATE reported when a relation does not exist.
const UNDEFINED_TABLE: &str = "42P01";

/// One applied migration as recorded in the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration file name.
    pub name: String,
    /// Content fingerprint at the time it was applied.
    pub hash: String,
}

impl MigrationRecord {
    /// Creates a record.
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }

    fn from_row(row: &Row) -> PgResult<Self> {
        let name = row
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| PgError::Unexpected("history row without a name".into()))?;
        let hash = row.get("hash").and_then(JsonValue::as_str).unwrap_or_default();

        Ok(Self::new(name, hash))
    }
}

/// Statements reading and writing the history table.
#[derive(Debug, Clone)]
pub(crate) struct MigrationsLog {
    table: String,
}

impl MigrationsLog {
    pub(crate) fn new(table_name: &str) -> PgResult<Self> {
        Ok(Self {
            table: escape_identifier(table_name)?,
        })
    }

    pub(crate) fn create_table_query(&self) -> Query {
        Query::batch(format!(
            "create table if not exists {} \
             (name text primary key, hash text, created_at timestamp default current_timestamp)",
            self.table
        ))
    }

    pub(crate) fn select_query(&self) -> Query {
        Query::new(format!("select name, hash from {} order by name", self.table))
            .with_name("migration-history")
    }

    pub(crate) fn insert_query(&self, record: &MigrationRecord) -> Query {
        Query::new(format!("insert into {} (name, hash) values ($1, $2)", self.table))
            .bind(record.name.as_str())
            .bind(record.hash.as_str())
            .with_name("migration-record")
    }

    /// Creates the history table if it does not exist yet.
    pub(crate) async fn init_schema<C: Connection>(&self, conn: &mut C) -> PgResult<()> {
        execute(conn, &self.create_table_query()).await?;
        Ok(())
    }

    /// Reads the history ordered by name.
    pub(crate) async fn past_migrations<C: Connection>(
        &self,
        conn: &mut C,
    ) -> PgResult<Vec<MigrationRecord>> {
        let rows = execute(conn, &self.select_query()).await?;
        rows.iter().map(MigrationRecord::from_row).collect()
    }

    /// Reads the history, treating a missing table as empty.
    pub(crate) async fn past_migrations_if_exists<C: Connection>(
        &self,
        conn: &mut C,
    ) -> PgResult<Vec<MigrationRecord>> {
        let query = self.select_query().ignore_error_codes([UNDEFINED_TABLE]);
        let rows = execute(conn, &query).await?;
        rows.iter().map(MigrationRecord::from_row).collect()
    }

    /// Records an applied migration.
    pub(crate) async fn insert<C: Connection>(
        &self,
        conn: &mut C,
        record: &MigrationRecord,
    ) -> PgResult<()> {
        execute(conn, &self.insert_query(record)).await?;
        Ok(())
    }
}
