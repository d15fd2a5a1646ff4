//! Connection identity and the row source seam.
//!
//! The core never opens connections itself. A `Connector` turns a
//! connection string into a `RowSource`; a `Connection` pairs that source
//! with the `ConnectionInfo` used for cache keys and identity labels.

use std::fmt;

use crate::error::{ConfigError, DecodeError, ExecutionError};
use crate::value::Row;

/// Rows returned by one query execution. Each row decodes independently.
pub type QueryRows = Vec<Result<Row, DecodeError>>;

/// Executes SQL and returns decoded rows.
pub trait RowSource: Send {
    fn query(&mut self, sql: &str) -> Result<QueryRows, ExecutionError>;

    /// Whether the session is gone and the source must be reopened.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Opens row sources from connection strings.
pub trait Connector: Send + Sync {
    /// Derives the identity of a connection string without connecting.
    fn identify(&self, conn_str: &str) -> Result<ConnectionInfo, ConfigError>;

    fn connect(&self, conn_str: &str) -> Result<Box<dyn RowSource>, ExecutionError>;
}

/// Identity of a scrape target: (driver, host, database, user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionInfo {
    pub driver: String,
    pub host: String,
    pub database: String,
    pub user: String,
}

impl ConnectionInfo {
    pub fn new(
        driver: impl Into<String>,
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            host: host.into(),
            database: database.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}/{}",
            self.driver, self.user, self.host, self.database
        )
    }
}

/// A scrape target: identity plus an optional live row source.
pub struct Connection {
    conn_str: String,
    info: ConnectionInfo,
    source: Option<Box<dyn RowSource>>,
}

impl Connection {
    /// Creates an unconnected target.
    pub fn new(conn_str: impl Into<String>, info: ConnectionInfo) -> Self {
        Self {
            conn_str: conn_str.into(),
            info,
            source: None,
        }
    }

    /// Creates a target with an already open source.
    pub fn with_source(info: ConnectionInfo, source: impl RowSource + 'static) -> Self {
        Self {
            conn_str: String::new(),
            info,
            source: Some(Box::new(source)),
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn is_connected(&self) -> bool {
        self.source.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Opens the source through `connector` unless already connected.
    /// A closed source is dropped and reopened.
    pub fn ensure_connected(&mut self, connector: &dyn Connector) -> Result<(), ExecutionError> {
        if !self.is_connected() {
            self.source = None;
            self.source = Some(connector.connect(&self.conn_str)?);
        }
        Ok(())
    }

    pub(crate) fn source_mut(&mut self) -> Result<&mut (dyn RowSource + 'static), ConfigError> {
        self.source.as_deref_mut().ok_or(ConfigError::NotConnected)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .field("connected", &self.is_connected())
            .finish()
    }
}
