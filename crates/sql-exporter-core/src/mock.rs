//! In-memory row source for testing discovery and scraping without a database.
//!
//! `MockSource` is a cheap handle: clones share state, so a test can hand one
//! clone to a `Connection` and keep another to change the scripted result
//! between scrapes or to count executions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::connection::{ConnectionInfo, Connector, QueryRows, RowSource};
use crate::error::{ConfigError, ExecutionError};
use crate::value::{Row, SqlValue};

/// Builds a row from `(column, value)` pairs.
pub fn row<K, V>(cols: impl IntoIterator<Item = (K, V)>) -> Row
where
    K: Into<String>,
    V: Into<SqlValue>,
{
    cols.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[derive(Debug)]
struct MockState {
    result: Result<QueryRows, ExecutionError>,
    executions: usize,
    last_sql: Option<String>,
    closed: bool,
}

/// Scripted row source.
#[derive(Debug, Clone)]
pub struct MockSource {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    /// Creates a source returning zero rows.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                result: Ok(Vec::new()),
                executions: 0,
                last_sql: None,
                closed: false,
            })),
        }
    }

    /// Creates a source returning `rows` on every execution.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        let source = Self::new();
        source.set_rows(rows);
        source
    }

    pub fn set_rows(&self, rows: Vec<Row>) {
        self.set_results(rows.into_iter().map(Ok).collect());
    }

    /// Sets per-row results, allowing decode failures to be scripted.
    pub fn set_results(&self, rows: QueryRows) {
        self.lock().result = Ok(rows);
    }

    /// Makes every following execution fail.
    pub fn fail_with(&self, message: &str) {
        self.lock().result = Err(ExecutionError::new(message));
    }

    /// Number of executions so far.
    pub fn executions(&self) -> usize {
        self.lock().executions
    }

    pub fn last_sql(&self) -> Option<String> {
        self.lock().last_sql.clone()
    }

    /// Marks the session as closed, as after a server restart.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RowSource for MockSource {
    fn query(&mut self, sql: &str) -> Result<QueryRows, ExecutionError> {
        let mut state = self.lock();
        state.executions += 1;
        state.last_sql = Some(sql.to_string());
        state.result.clone()
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Connector handing out registered `MockSource`s.
///
/// Connection strings look like `mock://user@host/database`. Unregistered
/// strings fail to connect, which simulates an unreachable target.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    sources: Arc<Mutex<HashMap<String, MockSource>>>,
    connects: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source for `conn_str`.
    pub fn add(&self, conn_str: &str, source: MockSource) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn_str.to_string(), source);
    }

    /// Number of successful connects to `conn_str`.
    pub fn connects(&self, conn_str: &str) -> usize {
        self.connects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conn_str)
            .copied()
            .unwrap_or(0)
    }
}

impl Connector for MockConnector {
    fn identify(&self, conn_str: &str) -> Result<ConnectionInfo, ConfigError> {
        let rest = conn_str
            .strip_prefix("mock://")
            .ok_or_else(|| ConfigError::InvalidConnection(conn_str.to_string()))?;
        let (user, rest) = rest.split_once('@').unwrap_or(("", rest));
        let (host, database) = rest.split_once('/').unwrap_or((rest, ""));
        Ok(ConnectionInfo::new("mock", host, database, user))
    }

    fn connect(&self, conn_str: &str) -> Result<Box<dyn RowSource>, ExecutionError> {
        let source = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conn_str)
            .cloned()
            .ok_or_else(|| ExecutionError::new(format!("connection refused: {}", conn_str)))?;
        *self
            .connects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(conn_str.to_string())
            .or_default() += 1;
        Ok(Box::new(source))
    }
}
