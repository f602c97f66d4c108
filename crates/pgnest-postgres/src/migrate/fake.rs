//! In-memory database understanding the statements of the migration engine.
//!
//! The advisory lock is a shared async mutex whose guard lives in the
//! connection that took it, so it is held until that connection goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use tokio::sync::OwnedMutexGuard;

use super::MigrationRecord;
use crate::client::{Connection, ConnectionProvider, QueryOutput};
use crate::error::DriverError;
use crate::{PgResult, Query, Row};

#[derive(Debug, Default)]
struct FakeInner {
    history_exists: bool,
    history: Vec<MigrationRecord>,
    executed: Vec<String>,
    failures: HashMap<String, String>,
    connections: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDatabase {
    inner: Arc<Mutex<FakeInner>>,
    advisory_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FakeDatabase {
    fn with<R>(&self, f: impl FnOnce(&mut FakeInner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner)
    }

    /// Fails every migration statement with exactly this text.
    pub(crate) fn fail_on(&self, text: &str, code: &str) {
        self.with(|inner| inner.failures.insert(text.to_owned(), code.to_owned()));
    }

    pub(crate) fn clear_failures(&self) {
        self.with(|inner| inner.failures.clear());
    }

    /// Migration statements executed so far, in order.
    pub(crate) fn executed(&self) -> Vec<String> {
        self.with(|inner| inner.executed.clone())
    }

    pub(crate) fn history(&self) -> Vec<MigrationRecord> {
        self.with(|inner| inner.history.clone())
    }

    pub(crate) fn history_exists(&self) -> bool {
        self.with(|inner| inner.history_exists)
    }

    pub(crate) fn connections(&self) -> usize {
        self.with(|inner| inner.connections)
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.advisory_lock.try_lock().is_err()
    }

    fn run(&self, query: &Query) -> Result<QueryOutput, DriverError> {
        let text = query.text.trim();

        self.with(|inner| {
            if text.starts_with("create table if not exists") {
                inner.history_exists = true;
                return Ok(QueryOutput::command("CREATE", 0));
            }

            if text.starts_with("select name, hash from") {
                if !inner.history_exists {
                    return Err(DriverError::new("42P01", "relation does not exist"));
                }

                let mut records = inner.history.clone();
                records.sort_by(|a, b| a.name.cmp(&b.name));
                let rows = records
                    .into_iter()
                    .map(|record| {
                        let mut row = Row::new();
                        row.insert("name".into(), JsonValue::String(record.name));
                        row.insert("hash".into(), JsonValue::String(record.hash));
                        row
                    })
                    .collect();
                return Ok(QueryOutput::rows("SELECT", rows));
            }

            if text.starts_with("insert into") && text.contains("(name, hash)") {
                let field = |i: usize| {
                    query.values.get(i).and_then(JsonValue::as_str).unwrap_or_default().to_owned()
                };
                let record = MigrationRecord::new(field(0), field(1));
                if inner.history.iter().any(|r| r.name == record.name) {
                    return Err(DriverError::new("23505", "duplicate key value"));
                }

                inner.history.push(record);
                return Ok(QueryOutput::command("INSERT", 1));
            }

            if let Some(code) = inner.failures.get(text) {
                return Err(DriverError::new(code.clone(), format!("fake failure: {text}")));
            }

            inner.executed.push(text.to_owned());
            Ok(QueryOutput::command(query.command(), 0))
        })
    }
}

#[derive(Debug)]
pub(crate) struct FakeConnection {
    db: FakeDatabase,
    lock_guard: Option<OwnedMutexGuard<()>>,
}

impl Connection for FakeConnection {
    async fn query(&mut self, query: &Query) -> Result<QueryOutput, DriverError> {
        tokio::task::yield_now().await;

        let text = query.text.trim();
        if text.starts_with("select pg_advisory_lock(") {
            if self.lock_guard.is_none() {
                let guard = Arc::clone(&self.db.advisory_lock).lock_owned().await;
                self.lock_guard = Some(guard);
            }
            return Ok(QueryOutput::command("SELECT", 1));
        }

        if text.starts_with("select pg_advisory_unlock(") {
            self.lock_guard = None;
            return Ok(QueryOutput::command("SELECT", 1));
        }

        self.db.run(query)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeProvider {
    db: FakeDatabase,
}

impl FakeProvider {
    pub(crate) fn new(db: FakeDatabase) -> Self {
        Self { db }
    }
}

impl ConnectionProvider for FakeProvider {
    type Connection = FakeConnection;

    async fn acquire(&self) -> PgResult<FakeConnection> {
        self.db.with(|inner| inner.connections += 1);
        Ok(FakeConnection {
            db: self.db.clone(),
            lock_guard: None,
        })
    }
}
