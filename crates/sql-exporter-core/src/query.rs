//! Query definitions: descriptor discovery, scraping and the sample cache.
//!
//! A `Query` is shared (`Arc`) by every connection of a job. Discovery runs
//! once and fixes the descriptor; each scrape then replaces the cached
//! sample set of exactly one connection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, error, warn};

use crate::connection::{Connection, ConnectionInfo};
use crate::convert::{Sample, convert_row};
use crate::desc::{MetricDesc, is_value_column};
use crate::error::{ConfigError, QueryError};

/// Counters describing one successful scrape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    /// Rows returned by the source, including rows that failed to decode.
    pub rows: usize,
    /// Rows that contributed at least one sample.
    pub rows_used: usize,
    pub samples: usize,
    /// Value columns skipped because of coercion failures.
    pub skipped_columns: usize,
}

type SampleCache = HashMap<ConnectionInfo, Arc<Vec<Sample>>>;

/// A named SQL query turned into one gauge metric.
pub struct Query {
    name: String,
    sql: String,
    help: String,
    static_names: Vec<String>,
    static_values: Vec<String>,
    desc: OnceLock<Arc<MetricDesc>>,
    samples: Mutex<SampleCache>,
}

impl Query {
    /// Creates a query. Static labels are ordered by name.
    pub fn new(
        name: impl Into<String>,
        sql: impl Into<String>,
        help: impl Into<String>,
        static_labels: BTreeMap<String, String>,
    ) -> Self {
        let (static_names, static_values): (Vec<String>, Vec<String>) =
            static_labels.into_iter().unzip();
        Self {
            name: name.into(),
            sql: sql.into(),
            help: help.into(),
            static_names,
            static_values,
            desc: OnceLock::new(),
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptor, once discovery succeeded.
    pub fn descriptor(&self) -> Option<&Arc<MetricDesc>> {
        self.desc.get()
    }

    /// Executes the query once and builds the descriptor from the first row.
    ///
    /// The first stored descriptor stays in place for the lifetime of the
    /// query; a later discovery only reports schema drift.
    pub fn discover(
        &self,
        conn: &mut Connection,
        job: &str,
    ) -> Result<Arc<MetricDesc>, QueryError> {
        if self.sql.trim().is_empty() {
            return Err(ConfigError::EmptyQuery.into());
        }
        let info = conn.info().clone();
        let rows = conn.source_mut()?.query(&self.sql)?;

        let mut first = None;
        for result in rows {
            match result {
                Ok(row) => {
                    first = Some(row);
                    break;
                }
                Err(e) => {
                    error!(query = %self.name, host = %info.host, database = %info.database,
                        error = %e, "failed to scan row");
                }
            }
        }
        let row = first.ok_or(QueryError::EmptyResult)?;

        let label_columns: Vec<String> =
            row.keys().filter(|c| !is_value_column(c)).cloned().collect();
        let built = Arc::new(MetricDesc::new(
            &self.name,
            &self.help,
            &self.static_names,
            &label_columns,
            job,
        )?);

        let stored = self.desc.get_or_init(|| Arc::clone(&built));
        if stored.label_names() != built.label_names() {
            warn!(
                query = %self.name,
                discovered = ?built.label_names(),
                current = ?stored.label_names(),
                "schema changed since discovery, keeping original descriptor"
            );
        }
        debug!(query = %self.name, metric = %stored.name(), labels = ?stored.label_names(),
            "descriptor ready");
        Ok(Arc::clone(stored))
    }

    /// Executes the query on `conn` and replaces that connection's samples.
    ///
    /// Undecodable rows, rows without value columns and unconvertible
    /// columns are logged and skipped. Fails with `ZeroRows` when no row
    /// produced a sample; the cached samples are left untouched then.
    pub fn run(&self, conn: &mut Connection) -> Result<ScrapeSummary, QueryError> {
        let desc = self.desc.get().ok_or(ConfigError::MissingDescriptor)?;
        if self.sql.trim().is_empty() {
            return Err(ConfigError::EmptyQuery.into());
        }
        let info = conn.info().clone();
        let rows = conn.source_mut()?.query(&self.sql)?;

        let mut summary = ScrapeSummary {
            rows: rows.len(),
            ..Default::default()
        };
        let mut samples = Vec::with_capacity(rows.len());

        for result in rows {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    error!(query = %self.name, host = %info.host, database = %info.database,
                        error = %e, "failed to scan row");
                    continue;
                }
            };

            let conversion = match convert_row(desc, &self.static_values, &info, &row) {
                Ok(c) => c,
                Err(e) => {
                    error!(query = %self.name, host = %info.host, database = %info.database,
                        error = %e, "failed to update metrics");
                    continue;
                }
            };

            for e in &conversion.skipped {
                error!(query = %self.name, host = %info.host, database = %info.database,
                    error = %e, "failed to update metric");
            }
            if !conversion.unmapped.is_empty() {
                debug!(query = %self.name, columns = ?conversion.unmapped,
                    "columns not present at discovery ignored");
            }
            summary.skipped_columns += conversion.skipped.len();

            if conversion.samples.is_empty() {
                error!(query = %self.name, host = %info.host, database = %info.database,
                    "zero values found in row");
                continue;
            }
            summary.rows_used += 1;
            samples.extend(conversion.samples);
        }

        if summary.rows_used == 0 {
            return Err(QueryError::ZeroRows);
        }
        summary.samples = samples.len();

        self.lock_samples().insert(info, Arc::new(samples));
        Ok(summary)
    }

    /// Samples of the last successful scrape on `conn`.
    pub fn samples(&self, conn: &ConnectionInfo) -> Option<Arc<Vec<Sample>>> {
        self.lock_samples().get(conn).cloned()
    }

    /// All cached sample sets, ordered by connection.
    pub fn snapshot(&self) -> Vec<(ConnectionInfo, Arc<Vec<Sample>>)> {
        let mut all: Vec<_> = self
            .lock_samples()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn lock_samples(&self) -> MutexGuard<'_, SampleCache> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("name", &self.name)
            .field("discovered", &self.desc.get().is_some())
            .finish()
    }
}
