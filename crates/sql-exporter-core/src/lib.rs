//! sql-exporter-core - turns SQL result rows into Prometheus gauge samples.
//!
//! Provides:
//! - `value` - dynamically-typed column values (`SqlValue`, `Row`)
//! - `desc` - metric descriptors built from discovered columns
//! - `convert` - row → sample conversion with per-column coercion
//! - `query` - query definitions: discovery, scraping, per-connection cache
//! - `connection` - connection identity and the row source seam
//! - `pg` - PostgreSQL row source
//! - `mock` - in-memory row source for tests
//! - `config` - YAML job/query configuration
//! - `job` - interval scheduler that discovers and scrapes
//! - `collector` - `prometheus::core::Collector` over cached samples

pub mod collector;
pub mod config;
pub mod connection;
pub mod convert;
pub mod desc;
pub mod error;
pub mod job;
pub mod mock;
pub mod pg;
pub mod query;
pub mod value;

pub use collector::QueryCollector;
pub use config::{Config, ConfigLoadError, JobConfig, QueryConfig};
pub use connection::{Connection, ConnectionInfo, Connector, RowSource};
pub use convert::{RowConversion, Sample, convert_row};
pub use desc::MetricDesc;
pub use error::{ColumnError, ConfigError, DecodeError, ExecutionError, QueryError, RowError};
pub use job::{Job, QueryState, TickReport};
pub use query::{Query, ScrapeSummary};
pub use value::{Row, SqlValue};

/// Crate version, shared by the daemon's `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
