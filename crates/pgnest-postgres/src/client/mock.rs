//! Scripted in-memory connection for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Connection, ConnectionProvider, QueryOutput};
use crate::error::DriverError;
use crate::{PgResult, Query, Row};

#[derive(Debug, Default)]
struct MockInner {
    statements: Vec<String>,
    failures: HashMap<String, String>,
    replies: HashMap<String, Vec<Row>>,
    acquired: usize,
    closed: usize,
    discarded: usize,
}

/// State shared by every connection a [`MockProvider`] hands out.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockState {
    inner: Arc<Mutex<MockInner>>,
}

impl MockState {
    fn with<R>(&self, f: impl FnOnce(&mut MockInner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner)
    }

    /// Fails every statement with exactly this text.
    pub(crate) fn fail_on(&self, text: &str, code: &str) {
        self.with(|inner| inner.failures.insert(text.to_owned(), code.to_owned()));
    }

    /// Replies to every statement with exactly this text.
    pub(crate) fn reply(&self, text: &str, rows: Vec<Row>) {
        self.with(|inner| inner.replies.insert(text.to_owned(), rows));
    }

    /// Statements issued so far, in order.
    pub(crate) fn statements(&self) -> Vec<String> {
        self.with(|inner| inner.statements.clone())
    }

    pub(crate) fn acquired(&self) -> usize {
        self.with(|inner| inner.acquired)
    }

    pub(crate) fn closed(&self) -> usize {
        self.with(|inner| inner.closed)
    }

    pub(crate) fn discarded(&self) -> usize {
        self.with(|inner| inner.discarded)
    }
}

#[derive(Debug)]
pub(crate) struct MockConnection {
    state: MockState,
}

impl Connection for MockConnection {
    async fn query(&mut self, query: &Query) -> Result<QueryOutput, DriverError> {
        tokio::task::yield_now().await;

        self.state.with(|inner| {
            inner.statements.push(query.text.clone());
            if let Some(code) = inner.failures.get(&query.text) {
                return Err(DriverError::new(code.clone(), format!("mock failure: {}", query.text)));
            }

            let rows = inner.replies.get(&query.text).cloned().unwrap_or_default();
            Ok(QueryOutput::rows(query.command(), rows))
        })
    }

    async fn close(self) {
        self.state.with(|inner| inner.closed += 1);
    }

    fn discard(self) {
        self.state.with(|inner| inner.discarded += 1);
    }
}

#[derive(Debug)]
pub(crate) struct MockProvider {
    state: MockState,
}

impl MockProvider {
    pub(crate) fn new(state: MockState) -> Self {
        Self { state }
    }
}

impl ConnectionProvider for MockProvider {
    type Connection = MockConnection;

    async fn acquire(&self) -> PgResult<MockConnection> {
        self.state.with(|inner| inner.acquired += 1);
        Ok(MockConnection {
            state: self.state.clone(),
        })
    }
}
